//! Document lifecycle hooks.
//!
//! Hooks are registered on a [`DocumentStore`](crate::DocumentStore) and run
//! in registration order. Every method has an empty default.

use crate::document::Document;

/// Callbacks invoked around document initialization, saving and destruction.
pub trait DocumentHooks: Send + Sync {
    /// After a document is built in memory or loaded from its store.
    fn after_initialize(&self, _document: &mut Document) {}

    /// Before validation runs in `save()`.
    fn before_save(&self, _document: &mut Document) {}

    /// After a successful `save()`, whether or not a commit was written.
    fn after_save(&self, _document: &Document) {}

    /// Before the backing store is deleted.
    fn before_destroy(&self, _document: &Document) {}

    /// After the backing store is deleted.
    fn after_destroy(&self, _document: &Document) {}
}
