//! Nesting of per-file conflict records into the attribute shape.

use std::collections::BTreeMap;

use crate::codec::PATH_SEPARATOR;
use crate::models::{ConflictNode, ConflictRecord};

/// Nest conflict records by splitting each path on the separator.
///
/// `a/b/c` ends up at `tree["a"]["b"]["c"]`.
pub fn build_conflict_tree<I>(records: I) -> BTreeMap<String, ConflictNode>
where
    I: IntoIterator<Item = (String, ConflictRecord)>,
{
    let mut tree = BTreeMap::new();
    for (path, record) in records {
        let segments: Vec<&str> = path.split(PATH_SEPARATOR).collect();
        insert(&mut tree, &segments, record);
    }
    tree
}

fn insert(nodes: &mut BTreeMap<String, ConflictNode>, segments: &[&str], record: ConflictRecord) {
    let Some((name, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        nodes.insert(name.to_string(), ConflictNode::Record(record));
        return;
    }

    let node = nodes
        .entry(name.to_string())
        .or_insert_with(|| ConflictNode::Branch(BTreeMap::new()));
    if matches!(node, ConflictNode::Record(_)) {
        *node = ConflictNode::Branch(BTreeMap::new());
    }
    if let ConflictNode::Branch(children) = node {
        insert(children, rest, record);
    }
}
