//! Parsing of conflict-marker text into [`ConflictRecord`]s.
//!
//! The version-control engine leaves conflicted files in the working copy with
//! `<<<<<<<` / `=======` / `>>>>>>>` markers (and an optional `|||||||` base
//! section in diff3 style, which is skipped).

use crate::models::{ConflictRecord, Segment};

const OURS_MARKER: &str = "<<<<<<<";
const BASE_MARKER: &str = "|||||||";
const SEPARATOR_MARKER: &str = "=======";
const THEIRS_MARKER: &str = ">>>>>>>";

enum Section {
    Agreed(Vec<String>),
    Conflict { ours: Vec<String>, theirs: Vec<String> },
}

impl Section {
    fn is_empty(&self) -> bool {
        matches!(self, Section::Agreed(lines) if lines.is_empty())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Side {
    Both,
    Ours,
    Base,
    Theirs,
}

/// Parse the content of a conflicted file.
///
/// A file without markers yields a record with zero conflicts and a single
/// `Both` segment holding all of its lines.
pub fn parse_conflict_markers(content: &str) -> ConflictRecord {
    let mut sections = Vec::new();
    let mut current = Section::Agreed(Vec::new());
    let mut side = Side::Both;
    let mut conflict_count = 0;

    for line in content.lines() {
        if side == Side::Both && is_marker(line, OURS_MARKER) {
            conflict_count += 1;
            let finished = std::mem::replace(
                &mut current,
                Section::Conflict { ours: Vec::new(), theirs: Vec::new() },
            );
            if !finished.is_empty() {
                sections.push(finished);
            }
            side = Side::Ours;
        } else if side == Side::Ours && is_marker(line, BASE_MARKER) {
            side = Side::Base;
        } else if matches!(side, Side::Ours | Side::Base) && line == SEPARATOR_MARKER {
            side = Side::Theirs;
        } else if side == Side::Theirs && is_marker(line, THEIRS_MARKER) {
            sections.push(std::mem::replace(&mut current, Section::Agreed(Vec::new())));
            side = Side::Both;
        } else {
            let line = line.to_string();
            match (&mut current, side) {
                (Section::Agreed(lines), _) => lines.push(line),
                (Section::Conflict { ours, .. }, Side::Ours) => ours.push(line),
                (Section::Conflict { theirs, .. }, Side::Theirs) => theirs.push(line),
                _ => {}
            }
        }
    }
    if !current.is_empty() {
        sections.push(current);
    }

    let section_count = sections.len();
    let mut segments = Vec::new();
    for section in sections {
        match section {
            Section::Agreed(lines) => segments.push(Segment::Both(lines)),
            Section::Conflict { ours, theirs } => {
                segments.push(Segment::Ours(ours));
                segments.push(Segment::Theirs(theirs));
            }
        }
    }

    ConflictRecord {
        conflict_count,
        section_count,
        segments,
    }
}

fn is_marker(line: &str, marker: &str) -> bool {
    line.strip_prefix(marker)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(' '))
}
