//! Attribute tree codec.
//!
//! Flattens a nested attribute map into `(path, content)` pairs suitable for
//! writing as a git tree, and rebuilds the map from such pairs.
//!
//! Nested non-empty maps become directories; every other value is a leaf file
//! holding compact JSON. JSON `\n` escapes are written as literal newlines so
//! that multi-line text diffs and merges line by line.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

use crate::errors::CodecError;

/// A single attribute value: null, bool, number, string, array or map.
pub type AttributeValue = Value;

/// An attribute map, name to value.
pub type Attributes = Map<String, Value>;

/// Flattened tree contents: slash-joined path to file content.
pub type TreeEntries = BTreeMap<String, String>;

/// Path separator used both in tree paths and conflict paths.
pub const PATH_SEPARATOR: char = '/';

/// Flatten `attrs` into tree entries.
pub fn encode(attrs: &Attributes) -> Result<TreeEntries, CodecError> {
    let mut entries = TreeEntries::new();
    for (name, value) in attrs {
        encode_value(&mut entries, None, name, value)?;
    }
    Ok(entries)
}

/// Flatten `attrs`, keeping only the entries that overlap one of `paths`.
///
/// An entry overlaps a path when it is that path, lies beneath it, or is a
/// leaf above it. A map value therefore covers a leaf path and a leaf value
/// covers everything below its own path.
pub fn encode_subset(
    attrs: &Attributes,
    paths: &BTreeSet<String>,
) -> Result<TreeEntries, CodecError> {
    let mut entries = encode(attrs)?;
    entries.retain(|entry, _| paths.iter().any(|path| paths_overlap(entry, path)));
    Ok(entries)
}

/// Whether one slash-separated path equals or contains the other.
pub fn paths_overlap(a: &str, b: &str) -> bool {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    long.strip_prefix(short)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(PATH_SEPARATOR))
}

/// Rebuild an attribute map from tree entries.
pub fn decode(entries: &TreeEntries) -> Result<Attributes, CodecError> {
    let mut attrs = Attributes::new();
    for (path, content) in entries {
        let value = parse_leaf(path, content)?;
        insert_at_path(&mut attrs, path, value);
    }
    Ok(attrs)
}

/// Check that `name` can be used as a single tree entry name.
pub fn validate_name(name: &str) -> Result<(), CodecError> {
    let invalid = name.is_empty()
        || name.contains(PATH_SEPARATOR)
        || name.contains('\0')
        || matches!(name, "." | ".." | ".git");
    if invalid {
        return Err(CodecError::InvalidAttributeName(name.to_string()));
    }
    Ok(())
}

fn encode_value(
    entries: &mut TreeEntries,
    parent: Option<&str>,
    name: &str,
    value: &Value,
) -> Result<(), CodecError> {
    validate_name(name)?;
    let path = match parent {
        Some(parent) => format!("{parent}{PATH_SEPARATOR}{name}"),
        None => name.to_string(),
    };

    match value {
        Value::Object(map) if !map.is_empty() => {
            for (child, child_value) in map {
                encode_value(entries, Some(&path), child, child_value)?;
            }
        }
        // Scalars, arrays and empty maps are stored as one JSON leaf.
        _ => {
            let json = serde_json::to_string(value).map_err(|source| CodecError::Json {
                path: path.clone(),
                source,
            })?;
            entries.insert(path, unescape_newlines(&json));
        }
    }
    Ok(())
}

fn parse_leaf(path: &str, content: &str) -> Result<Value, CodecError> {
    // Compact JSON never ends in a newline, so trailing ones come from merges.
    let json = escape_newlines(content.trim_end_matches('\n'));
    serde_json::from_str(&json).map_err(|source| CodecError::Json {
        path: path.to_string(),
        source,
    })
}

/// Insert `value` at a slash-separated path, creating intermediate maps.
pub(crate) fn insert_at_path(attrs: &mut Attributes, path: &str, value: Value) {
    let mut segments = path.split(PATH_SEPARATOR).peekable();
    let mut current = attrs;
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_string(), value);
            return;
        }
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        current = match slot {
            Value::Object(map) => map,
            _ => return,
        };
    }
}

/// Turn JSON `\n` escapes into literal newlines, leaving `\\n` intact.
fn unescape_newlines(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    let mut chars = json.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some(next) => {
                out.push('\\');
                out.push(next);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn escape_newlines(content: &str) -> String {
    content.replace('\n', "\\n")
}
