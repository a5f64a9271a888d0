//! Versioned store: git repositories holding document history.
//!
//! Each document is a bare repository whose commits are complete snapshots of
//! its attribute tree. Pending merges live in non-bare scratch clones.

pub mod markers;
pub mod repo;
pub mod workspace;

pub use markers::parse_conflict_markers;
pub use repo::{Author, DocumentRepo};
pub use workspace::{divergence_count, MergeReport, MergeWorkspace};
