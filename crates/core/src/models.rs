//! Domain model types shared by the store, documents, merge engine and web API.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::PATH_SEPARATOR;

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// One entry of a document's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub commit_id: String,
    #[serde(rename = "user_id")]
    pub author: String,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Conflicts
// ---------------------------------------------------------------------------

/// A contiguous run of lines from a three-way comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    /// Lines only on the target side of a conflict block.
    Ours(Vec<String>),
    /// Lines only on the source side of a conflict block.
    Theirs(Vec<String>),
    /// Lines both sides agree on.
    Both(Vec<String>),
}

impl Segment {
    pub fn lines(&self) -> &[String] {
        match self {
            Self::Ours(lines) | Self::Theirs(lines) | Self::Both(lines) => lines,
        }
    }
}

/// Conflict detail for one conflicted attribute file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Number of conflict marker blocks.
    pub conflict_count: usize,
    /// Number of non-empty sections (agreed runs plus conflict blocks).
    pub section_count: usize,
    pub segments: Vec<Segment>,
}

impl ConflictRecord {
    /// Lines of every `Ours` segment, in order.
    pub fn ours(&self) -> Vec<&str> {
        self.side(|s| matches!(s, Segment::Ours(_)))
    }

    /// Lines of every `Theirs` segment, in order.
    pub fn theirs(&self) -> Vec<&str> {
        self.side(|s| matches!(s, Segment::Theirs(_)))
    }

    fn side(&self, keep: impl Fn(&Segment) -> bool) -> Vec<&str> {
        self.segments
            .iter()
            .filter(|s| keep(s))
            .flat_map(|s| s.lines().iter().map(String::as_str))
            .collect()
    }
}

/// A node of the nested conflict tree: either a record or more nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConflictNode {
    Record(ConflictRecord),
    Branch(BTreeMap<String, ConflictNode>),
}

/// Unresolved merge state of one document against one source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMerge {
    pub from_id: String,
    /// Conflicts nested the same way as the attributes they belong to.
    pub conflicts: BTreeMap<String, ConflictNode>,
}

impl PendingMerge {
    /// Look up the record at a slash-separated attribute path.
    pub fn record(&self, path: &str) -> Option<&ConflictRecord> {
        let mut segments = path.split(PATH_SEPARATOR);
        let mut node = self.conflicts.get(segments.next()?)?;
        for segment in segments {
            node = match node {
                ConflictNode::Branch(children) => children.get(segment)?,
                ConflictNode::Record(_) => return None,
            };
        }
        match node {
            ConflictNode::Record(record) => Some(record),
            ConflictNode::Branch(_) => None,
        }
    }

    /// Total number of conflicted attribute paths.
    pub fn conflicted_paths(&self) -> usize {
        fn count(nodes: &BTreeMap<String, ConflictNode>) -> usize {
            nodes
                .values()
                .map(|node| match node {
                    ConflictNode::Record(_) => 1,
                    ConflictNode::Branch(children) => count(children),
                })
                .sum()
        }
        count(&self.conflicts)
    }
}
