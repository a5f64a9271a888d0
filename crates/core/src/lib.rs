//! gitdoc core library.
//!
//! Versioned JSON documents stored as git repositories: every save is a
//! commit of the document's attribute tree, documents can be forked, and
//! forks can be merged back with conflicts surfaced per attribute.

pub mod codec;
pub mod config;
pub mod document;
pub mod documents;
pub mod errors;
pub mod hooks;
pub mod merge;
pub mod models;
pub mod store;

// Re-exports for convenience.
pub use codec::{AttributeValue, Attributes};
pub use config::{AppConfig, StorageConfig};
pub use document::{Document, SaveOutcome};
pub use documents::DocumentStore;
pub use errors::{CoreError, DocumentError};
pub use hooks::DocumentHooks;
pub use models::{ConflictNode, ConflictRecord, PendingMerge, Segment, Version};
