//! Entry point for looking up, building and creating documents.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::codec::{self, Attributes};
use crate::config::StorageConfig;
use crate::document::{is_valid_id, Document};
use crate::errors::DocumentError;
use crate::hooks::DocumentHooks;
use crate::store::DocumentRepo;

const DOCUMENTS_DIR: &str = "documents";
const MERGES_DIR: &str = "merges";

/// Handle on a storage root. Cheap to clone; every document keeps one.
#[derive(Clone)]
pub struct DocumentStore {
    config: Arc<StorageConfig>,
    hooks: Arc<Vec<Arc<dyn DocumentHooks>>>,
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("config", &self.config)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl DocumentStore {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config: Arc::new(config),
            hooks: Arc::new(Vec::new()),
        }
    }

    /// Register a lifecycle hook; hooks run in registration order.
    pub fn with_hook(mut self, hook: Arc<dyn DocumentHooks>) -> Self {
        Arc::make_mut(&mut self.hooks).push(hook);
        self
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub(crate) fn hooks(&self) -> Arc<Vec<Arc<dyn DocumentHooks>>> {
        Arc::clone(&self.hooks)
    }

    /// `<root>/documents/<id>`.
    pub fn document_path(&self, id: &str) -> PathBuf {
        self.config.root_path.join(DOCUMENTS_DIR).join(id)
    }

    /// `<root>/merges/<id>`.
    pub fn merges_path(&self, id: &str) -> PathBuf {
        self.config.root_path.join(MERGES_DIR).join(id)
    }

    /// `<root>/merges/<id>/<from_id>`.
    pub fn merge_path(&self, id: &str, from_id: &str) -> PathBuf {
        self.merges_path(id).join(from_id)
    }

    /// Whether a document with this id has a backing store.
    pub fn exists(&self, id: &str) -> bool {
        is_valid_id(id) && self.document_path(id).is_dir()
    }

    /// Path of an existing document's store; ids that cannot name one are
    /// reported as not found.
    pub(crate) fn existing_path(&self, id: &str) -> Result<PathBuf, DocumentError> {
        if !self.exists(id) {
            return Err(DocumentError::NotFound(id.to_string()));
        }
        Ok(self.document_path(id))
    }

    /// Build an unsaved document from attributes (including `id`).
    pub fn build(&self, attrs: Attributes) -> Result<Document, DocumentError> {
        Document::new(self.clone(), attrs)
    }

    /// Read the attributes stored at `commit_id` (default: newest commit).
    ///
    /// Returns the attributes together with the id of the commit read.
    pub fn load(
        &self,
        id: &str,
        commit_id: Option<&str>,
    ) -> Result<(Attributes, String), DocumentError> {
        let repo = DocumentRepo::open(&self.existing_path(id)?)?;
        let commit_id = match commit_id {
            Some(commit_id) => commit_id.to_string(),
            None => repo
                .head_id()?
                .ok_or_else(|| DocumentError::NotFound(id.to_string()))?,
        };
        let attrs = codec::decode(&repo.read_tree(Some(&commit_id))?)?;
        debug!(id, commit_id = %commit_id, attributes = attrs.len(), "loaded document");
        Ok((attrs, commit_id))
    }

    /// Load the newest version of a document.
    pub fn find(&self, id: &str) -> Result<Document, DocumentError> {
        let (attrs, commit_id) = self.load(id, None)?;
        Ok(Document::from_store(self.clone(), id, attrs, commit_id, false))
    }

    /// Load a read-only snapshot of a document as of `commit_id`.
    pub fn find_version(&self, id: &str, commit_id: &str) -> Result<Document, DocumentError> {
        let (attrs, commit_id) = self.load(id, Some(commit_id))?;
        Ok(Document::from_store(self.clone(), id, attrs, commit_id, true))
    }

    /// Build and save a document.
    ///
    /// Validation failures do not raise; inspect [`Document::errors`] or
    /// [`Document::is_new_record`] on the returned document.
    ///
    /// Fails with `AlreadyExists` when a document with the same id is stored.
    pub fn create(&self, attrs: Attributes) -> Result<Document, DocumentError> {
        let mut document = self.build(attrs)?;
        self.ensure_vacant(&document)?;
        document.save()?;
        Ok(document)
    }

    /// Like [`create`](Self::create) but failing with `NotSaved` on invalid input.
    pub fn create_strict(&self, attrs: Attributes) -> Result<Document, DocumentError> {
        let mut document = self.build(attrs)?;
        self.ensure_vacant(&document)?;
        document.save_strict()?;
        Ok(document)
    }

    fn ensure_vacant(&self, document: &Document) -> Result<(), DocumentError> {
        match document.id() {
            Some(id) if self.exists(id) => Err(DocumentError::AlreadyExists(id.to_string())),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: serde_json::Value) -> Attributes {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_paths() {
        let store = DocumentStore::new(StorageConfig::new("/srv/gitdoc"));
        assert_eq!(store.document_path("foo"), PathBuf::from("/srv/gitdoc/documents/foo"));
        assert_eq!(store.merge_path("foo", "bar"), PathBuf::from("/srv/gitdoc/merges/foo/bar"));
    }

    #[test]
    fn test_find_missing_and_invalid_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(StorageConfig::new(dir.path()));
        assert!(matches!(store.find("foo"), Err(DocumentError::NotFound(_))));
        assert!(matches!(store.find("../documents"), Err(DocumentError::NotFound(_))));
        assert!(matches!(store.find(".."), Err(DocumentError::NotFound(_))));
    }

    #[test]
    fn test_create_and_find() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(StorageConfig::new(dir.path()));
        let created = store
            .create(attrs(json!({ "id": "foo", "foo": "bar", "n": { "m": 1 } })))
            .unwrap();
        assert!(!created.is_new_record());

        let found = store.find("foo").unwrap();
        assert_eq!(found.id(), Some("foo"));
        assert_eq!(found.get("foo"), Some(&json!("bar")));
        assert_eq!(found.get("n"), Some(&json!({ "m": 1 })));
        assert_eq!(found.commit_id(), created.commit_id());
    }

    #[test]
    fn test_create_existing_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(StorageConfig::new(dir.path()));
        store.create(attrs(json!({ "id": "foo" }))).unwrap();
        assert!(matches!(
            store.create(attrs(json!({ "id": "foo" }))),
            Err(DocumentError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_create_strict_without_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(StorageConfig::new(dir.path()));
        assert!(matches!(
            store.create_strict(attrs(json!({ "foo": "bar" }))),
            Err(DocumentError::NotSaved(_))
        ));
    }

    #[test]
    fn test_find_version_is_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(StorageConfig::new(dir.path()));
        let mut doc = store.create(attrs(json!({ "id": "foo", "counter": 0 }))).unwrap();
        let first = doc.commit_id().unwrap().to_string();
        doc.set("counter", json!(1)).unwrap();
        doc.save().unwrap();

        let mut old = store.find_version("foo", &first).unwrap();
        assert_eq!(old.get("counter"), Some(&json!(0)));
        assert!(matches!(
            old.set("counter", json!(5)),
            Err(DocumentError::ReadOnlyVersion { .. })
        ));
        assert!(matches!(
            store.find_version("foo", "deadbeef"),
            Err(DocumentError::NotFound(_))
        ));
    }
}
