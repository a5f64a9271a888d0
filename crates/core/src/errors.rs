//! Error types for the gitdoc core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.
//!
//! Validation failures (blank id, bad characters, duplicate id on create) are
//! not errors: they are collected on the document and reported through
//! [`SaveOutcome::Invalid`](crate::document::SaveOutcome).

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Codec errors
// ---------------------------------------------------------------------------

/// Errors from flattening attributes into tree entries and back.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A map key cannot be used as a tree entry name.
    #[error("invalid attribute name '{0}'")]
    InvalidAttributeName(String),

    /// A leaf could not be serialized or its stored content is not JSON.
    #[error("attribute content at '{path}' is not valid JSON: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

/// Errors from the git-backed versioned store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No repository exists at the path.
    #[error("repository not found at '{0}'")]
    NotFound(String),

    /// A repository (or any file) already occupies the path.
    #[error("repository already exists at '{0}'")]
    AlreadyExists(String),

    /// A commit id could not be parsed or resolved.
    #[error("commit not found: {0}")]
    CommitNotFound(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// Generic I/O wrapper.
    #[error("store I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Document errors
// ---------------------------------------------------------------------------

/// Structural errors raised by documents, forks and merges.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// The document (or merge workspace) has no backing store.
    #[error("document not found: {0}")]
    NotFound(String),

    /// A document with this id already exists.
    #[error("document already exists: {0}")]
    AlreadyExists(String),

    /// Strict save failed validation.
    #[error("document not saved: {0}")]
    NotSaved(String),

    /// A dynamic attribute name collides with a reserved name or is malformed.
    #[error("invalid attribute name '{0}'")]
    InvalidAttributeName(String),

    /// Removal of `id` or of an attribute that does not exist.
    #[error("invalid attribute '{0}'")]
    InvalidAttribute(String),

    /// A document id that cannot name a store (blank, or a disallowed character).
    #[error("invalid document id '{0}'")]
    InvalidId(String),

    /// The id was assigned after the document was persisted.
    #[error("id of document '{0}' is read-only once saved")]
    ReadOnlyId(String),

    /// Historical snapshots cannot be modified or saved.
    #[error("document '{id}' at commit {commit_id} is a read-only version")]
    ReadOnlyVersion { id: String, commit_id: String },

    /// The operation needs a persisted document.
    #[error("document has not been saved yet")]
    NotPersisted,

    /// Underlying store error.
    #[error("document store error: {0}")]
    Store(StoreError),

    /// Underlying codec error.
    #[error("document codec error: {0}")]
    Codec(#[from] CodecError),
}

impl From<StoreError> for DocumentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(path) => Self::NotFound(path),
            StoreError::AlreadyExists(path) => Self::AlreadyExists(path),
            StoreError::CommitNotFound(id) => Self::NotFound(id),
            other => Self::Store(other),
        }
    }
}

impl DocumentError {
    /// True for the "no backing store" family of errors.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
