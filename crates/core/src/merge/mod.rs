//! Fork, merge and conflict resolution for documents.
//!
//! A merge of `from_id` into `id` runs in the scratch workspace
//! `<root>/merges/<id>/<from_id>`. A clean merge replaces the target's
//! history immediately; a conflicted one stays pending until
//! [`Document::resolve_conflicts`](crate::Document::resolve_conflicts)
//! clears every conflicted attribute.

mod engine;
mod resolver;
pub mod tree;

pub use tree::build_conflict_tree;
