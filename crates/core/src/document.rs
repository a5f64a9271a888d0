//! The document model.
//!
//! A [`Document`] holds an attribute map in memory, tracks which attributes
//! changed since it was loaded or last saved, validates its id, and persists
//! itself as a commit in its own repository.
//!
//! `id` and `user_id` are bookkeeping attributes: `id` names the repository
//! and `user_id` names the commit author. Neither is written into the tree.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;

use regex_lite::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::codec::{self, Attributes};
use crate::documents::DocumentStore;
use crate::errors::DocumentError;
use crate::models::Version;
use crate::store::{Author, DocumentRepo};

pub const ID_ATTRIBUTE: &str = "id";
pub const USER_ATTRIBUTE: &str = "user_id";

const BOOKKEEPING_ATTRIBUTES: [&str; 2] = [ID_ATTRIBUTE, USER_ATTRIBUTE];

/// Names that cannot be used for dynamic attributes.
pub const RESERVED_ATTRIBUTE_NAMES: &[&str] = &[
    ID_ATTRIBUTE,
    "attribute",
    "attributes",
    "changes",
    "commit_id",
    "create_attribute",
    "create_fork",
    "destroy",
    "errors",
    "history",
    "merge",
    "merge_needed",
    "new_record",
    "path",
    "pending_merges",
    "reload",
    "remove_attribute",
    "resolve_conflicts",
    "save",
    "to_json",
    "to_param",
    "update_attributes",
    "valid",
    "version",
];

const BLANK_MESSAGE: &str = "can't be blank";
const FORMAT_MESSAGE: &str = "must be a valid file name";
const DUPLICATE_MESSAGE: &str = "already exists";

fn id_format() -> &'static Regex {
    static ID_FORMAT: OnceLock<Regex> = OnceLock::new();
    ID_FORMAT.get_or_init(|| Regex::new(r"^[^/?*:;{}\\]+$").expect("id pattern is valid"))
}

/// Whether `id` can name a document store.
pub fn is_valid_id(id: &str) -> bool {
    id_format().is_match(id) && id != "." && id != ".."
}

/// Value before and after a change; `None` means the attribute was absent.
pub type Change = (Option<Value>, Option<Value>);

/// Changes keyed by attribute name.
pub type Changes = BTreeMap<String, Change>;

/// Validation messages collected per field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors {
    messages: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn add(&mut self, field: &str, message: &str) {
        self.messages
            .entry(field.to_string())
            .or_default()
            .push(message.to_string());
    }

    /// Messages for one field, in the order they were added.
    pub fn get(&self, field: &str) -> &[String] {
        self.messages.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// `"<field> <message>"` for every message.
    pub fn full_messages(&self) -> Vec<String> {
        self.messages
            .iter()
            .flat_map(|(field, messages)| messages.iter().map(move |m| format!("{field} {m}")))
            .collect()
    }
}

/// Result of [`Document::save`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// First commit of a new document.
    Created(String),
    /// A new commit chained onto the previous one.
    Updated(String),
    /// Nothing changed; no commit was written.
    Unchanged,
    /// Validation failed; see [`Document::errors`].
    Invalid,
}

impl SaveOutcome {
    pub fn is_saved(&self) -> bool {
        !matches!(self, Self::Invalid)
    }

    pub fn commit_id(&self) -> Option<&str> {
        match self {
            Self::Created(id) | Self::Updated(id) => Some(id),
            Self::Unchanged | Self::Invalid => None,
        }
    }
}

/// A versioned attribute document.
pub struct Document {
    pub(crate) store: DocumentStore,
    id: Option<String>,
    attributes: Attributes,
    /// Value of each changed attribute before its first change.
    originals: BTreeMap<String, Option<Value>>,
    previous_changes: Changes,
    new_record: bool,
    commit_id: Option<String>,
    read_only: bool,
    errors: ValidationErrors,
}

impl Document {
    pub(crate) fn new(store: DocumentStore, mut attrs: Attributes) -> Result<Self, DocumentError> {
        let mut document = Self::blank(store);
        document.id = attrs.remove(ID_ATTRIBUTE).and_then(id_from_value);
        for (name, value) in attrs {
            document.create_attribute(&name, value)?;
        }
        document.originals.clear();
        document.run_after_initialize();
        Ok(document)
    }

    pub(crate) fn from_store(
        store: DocumentStore,
        id: &str,
        attrs: Attributes,
        commit_id: String,
        read_only: bool,
    ) -> Self {
        let mut document = Self::blank(store);
        document.id = Some(id.to_string());
        document.attributes = attrs;
        document.new_record = false;
        document.commit_id = Some(commit_id);
        document.read_only = read_only;
        document.run_after_initialize();
        document
    }

    fn blank(store: DocumentStore) -> Self {
        Self {
            store,
            id: None,
            attributes: Attributes::new(),
            originals: BTreeMap::new(),
            previous_changes: Changes::new(),
            new_record: true,
            commit_id: None,
            read_only: false,
            errors: ValidationErrors::default(),
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// All attributes except `id`.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Commit this instance reflects; `None` until first saved and while
    /// stored attributes have unsaved changes.
    pub fn commit_id(&self) -> Option<&str> {
        if self.has_persistable_changes() {
            return None;
        }
        self.commit_id.as_deref()
    }

    pub fn is_new_record(&self) -> bool {
        self.new_record
    }

    /// True for snapshots obtained through [`version`](Self::version).
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn errors(&self) -> &ValidationErrors {
        &self.errors
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// Path of the backing store, once the document has an id.
    pub fn path(&self) -> Option<PathBuf> {
        self.id.as_deref().map(|id| self.store.document_path(id))
    }

    pub fn to_param(&self) -> Option<&str> {
        self.id()
    }

    pub fn to_key(&self) -> Option<[&str; 1]> {
        self.id().map(|id| [id])
    }

    /// `id` plus every attribute as one JSON object.
    pub fn to_json(&self) -> Value {
        let mut map = self.attributes.clone();
        if let Some(id) = &self.id {
            map.insert(ID_ATTRIBUTE.to_string(), Value::String(id.clone()));
        }
        Value::Object(map)
    }

    /// Commit identity: the `user_id` attribute, or the configured default.
    pub fn author(&self) -> Author {
        let config = self.store.config();
        let name = match self.attributes.get(USER_ATTRIBUTE) {
            Some(Value::String(user)) if !user.trim().is_empty() => user.as_str(),
            _ => config.default_author.as_str(),
        };
        Author::new(name, &config.email_domain)
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Change the id. Only allowed before the first successful save.
    pub fn set_id(&mut self, id: impl Into<String>) -> Result<(), DocumentError> {
        self.ensure_writable()?;
        if !self.new_record {
            return Err(DocumentError::ReadOnlyId(self.id.clone().unwrap_or_default()));
        }
        let before = self.id.replace(id.into()).map(Value::String);
        self.record_change(ID_ATTRIBUTE, before);
        Ok(())
    }

    /// Add a new attribute. Returns `false` if it already exists.
    pub fn create_attribute(&mut self, name: &str, value: Value) -> Result<bool, DocumentError> {
        self.ensure_writable()?;
        if RESERVED_ATTRIBUTE_NAMES.contains(&name) || codec::validate_name(name).is_err() {
            return Err(DocumentError::InvalidAttributeName(name.to_string()));
        }
        if self.attributes.contains_key(name) {
            return Ok(false);
        }
        self.attributes.insert(name.to_string(), value);
        self.record_change(name, None);
        Ok(true)
    }

    /// Assign an attribute, creating it if needed. `id` goes through
    /// [`set_id`](Self::set_id).
    pub fn set(&mut self, name: &str, value: Value) -> Result<(), DocumentError> {
        if name == ID_ATTRIBUTE {
            let id = id_from_value(value).unwrap_or_default();
            return self.set_id(id);
        }
        if !self.attributes.contains_key(name) {
            self.create_attribute(name, value)?;
            return Ok(());
        }
        self.ensure_writable()?;
        let before = self.attributes.insert(name.to_string(), value);
        self.record_change(name, before);
        Ok(())
    }

    /// Remove an attribute, returning its value.
    pub fn remove_attribute(&mut self, name: &str) -> Result<Value, DocumentError> {
        self.ensure_writable()?;
        if name == ID_ATTRIBUTE {
            return Err(DocumentError::InvalidAttribute(name.to_string()));
        }
        let removed = self
            .attributes
            .remove(name)
            .ok_or_else(|| DocumentError::InvalidAttribute(name.to_string()))?;
        self.record_change(name, Some(removed.clone()));
        Ok(removed)
    }

    /// Assign every attribute in `attrs` except `id`.
    pub fn assign_attributes(&mut self, attrs: Attributes) -> Result<(), DocumentError> {
        for (name, value) in attrs {
            if name != ID_ATTRIBUTE {
                self.set(&name, value)?;
            }
        }
        Ok(())
    }

    /// Assign `attrs` and save.
    pub fn update_attributes(&mut self, attrs: Attributes) -> Result<SaveOutcome, DocumentError> {
        self.assign_attributes(attrs)?;
        self.save()
    }

    // -----------------------------------------------------------------------
    // Change tracking
    // -----------------------------------------------------------------------

    pub fn is_changed(&self) -> bool {
        !self.originals.is_empty()
    }

    pub fn attribute_changed(&self, name: &str) -> bool {
        self.originals.contains_key(name)
    }

    /// Names of the attributes changed since load or last save.
    pub fn changed_attributes(&self) -> Vec<&str> {
        self.originals.keys().map(String::as_str).collect()
    }

    /// Each changed attribute with its value before and now.
    pub fn changes(&self) -> Changes {
        self.originals
            .iter()
            .map(|(name, before)| (name.clone(), (before.clone(), self.current_value(name))))
            .collect()
    }

    /// Changes cleared by the last successful save.
    pub fn previous_changes(&self) -> &Changes {
        &self.previous_changes
    }

    /// Value before the pending change, or the current value if unchanged.
    pub fn attribute_was(&self, name: &str) -> Option<Value> {
        match self.originals.get(name) {
            Some(before) => before.clone(),
            None => self.current_value(name),
        }
    }

    /// Undo the pending change of one attribute.
    pub fn reset_attribute(&mut self, name: &str) -> Result<(), DocumentError> {
        self.ensure_writable()?;
        let Some(before) = self.originals.remove(name) else {
            return Ok(());
        };
        if name == ID_ATTRIBUTE {
            self.id = before.and_then(id_from_value);
            return Ok(());
        }
        match before {
            Some(value) => self.attributes.insert(name.to_string(), value),
            None => self.attributes.remove(name),
        };
        Ok(())
    }

    fn current_value(&self, name: &str) -> Option<Value> {
        if name == ID_ATTRIBUTE {
            return self.id.clone().map(Value::String);
        }
        self.attributes.get(name).cloned()
    }

    /// Track a mutation given the attribute's value right before it.
    fn record_change(&mut self, name: &str, before: Option<Value>) {
        let current = self.current_value(name);
        match self.originals.get(name) {
            Some(original) if *original == current => {
                self.originals.remove(name);
            }
            Some(_) => {}
            None if before != current => {
                self.originals.insert(name.to_string(), before);
            }
            None => {}
        }
    }

    fn has_persistable_changes(&self) -> bool {
        self.originals
            .keys()
            .any(|name| !BOOKKEEPING_ATTRIBUTES.contains(&name.as_str()))
    }

    /// Attributes that go into the tree.
    pub(crate) fn persistable_attributes(attrs: &Attributes) -> Attributes {
        attrs
            .iter()
            .filter(|(name, _)| !BOOKKEEPING_ATTRIBUTES.contains(&name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Validation & persistence
    // -----------------------------------------------------------------------

    /// Run validations, replacing any previously collected errors.
    pub fn validate(&mut self) -> bool {
        self.errors.clear();
        match self.id.as_deref() {
            None | Some("") => {
                self.errors.add(ID_ATTRIBUTE, BLANK_MESSAGE);
                self.errors.add(ID_ATTRIBUTE, FORMAT_MESSAGE);
            }
            Some(id) if !is_valid_id(id) => self.errors.add(ID_ATTRIBUTE, FORMAT_MESSAGE),
            Some(_) => {}
        }
        self.errors.is_empty()
    }

    /// Persist the document.
    ///
    /// A new document gets a fresh repository and its first commit. An
    /// existing one is committed only when a stored attribute changed.
    #[instrument(skip(self), fields(id = self.id.as_deref().unwrap_or("")))]
    pub fn save(&mut self) -> Result<SaveOutcome, DocumentError> {
        self.ensure_writable()?;
        for hook in self.store.hooks().iter() {
            hook.before_save(self);
        }
        if !self.validate() {
            debug!(errors = ?self.errors.full_messages(), "validation failed");
            return Ok(SaveOutcome::Invalid);
        }
        let id = self.id.clone().unwrap_or_default();
        let path = self.store.document_path(&id);

        let outcome = if self.new_record {
            if path.exists() {
                self.errors.add(ID_ATTRIBUTE, DUPLICATE_MESSAGE);
                return Ok(SaveOutcome::Invalid);
            }
            let entries = codec::encode(&Self::persistable_attributes(&self.attributes))?;
            let repo = DocumentRepo::init(&path)?;
            let message = format!("Creating document #{id}");
            SaveOutcome::Created(repo.commit_snapshot(&entries, &message, &self.author(), None)?)
        } else if self.has_persistable_changes() {
            let entries = codec::encode(&Self::persistable_attributes(&self.attributes))?;
            let repo = DocumentRepo::open(&path)?;
            let parent = repo.head_id()?;
            let message = format!("Updating document #{id}");
            SaveOutcome::Updated(repo.commit_snapshot(
                &entries,
                &message,
                &self.author(),
                parent.as_deref(),
            )?)
        } else {
            SaveOutcome::Unchanged
        };

        if let Some(commit_id) = outcome.commit_id() {
            self.commit_id = Some(commit_id.to_string());
            info!(commit_id, "document saved");
        }
        self.new_record = false;
        self.previous_changes = self.changes();
        self.originals.clear();
        for hook in self.store.hooks().iter() {
            hook.after_save(self);
        }
        Ok(outcome)
    }

    /// Save, failing with `NotSaved` when validation fails.
    pub fn save_strict(&mut self) -> Result<SaveOutcome, DocumentError> {
        match self.save()? {
            SaveOutcome::Invalid => Err(DocumentError::NotSaved(
                self.errors.full_messages().join(", "),
            )),
            outcome => Ok(outcome),
        }
    }

    /// Discard in-memory changes and reload from the newest commit.
    ///
    /// `id` and `user_id` are kept.
    pub fn reload(&mut self) -> Result<(), DocumentError> {
        self.ensure_writable()?;
        let id = self.id.clone().ok_or(DocumentError::NotPersisted)?;
        let (mut attrs, commit_id) = self.store.load(&id, None)?;
        if let Some(user) = self.attributes.get(USER_ATTRIBUTE) {
            attrs.insert(USER_ATTRIBUTE.to_string(), user.clone());
        }
        self.attributes = attrs;
        self.originals.clear();
        self.commit_id = Some(commit_id);
        self.new_record = false;
        Ok(())
    }

    /// Delete the backing store and any pending merges into this document.
    #[instrument(skip(self), fields(id = self.id.as_deref().unwrap_or("")))]
    pub fn destroy(&mut self) -> Result<(), DocumentError> {
        self.ensure_writable()?;
        let id = self
            .id
            .clone()
            .ok_or_else(|| DocumentError::NotFound(String::new()))?;
        let path = self.store.existing_path(&id)?;
        for hook in self.store.hooks().iter() {
            hook.before_destroy(self);
        }

        DocumentRepo::open(&path)?.destroy()?;
        let merges = self.store.merges_path(&id);
        if merges.exists() {
            std::fs::remove_dir_all(&merges).map_err(|e| DocumentError::Store(e.into()))?;
        }
        self.commit_id = None;
        self.new_record = true;
        info!("document destroyed");

        for hook in self.store.hooks().iter() {
            hook.after_destroy(self);
        }
        Ok(())
    }

    /// Versions newest first; `None` for a document never saved.
    pub fn history(&self) -> Result<Option<Vec<Version>>, DocumentError> {
        if self.new_record {
            return Ok(None);
        }
        let id = self.require_persisted()?;
        let repo = DocumentRepo::open(&self.store.existing_path(id)?)?;
        Ok(Some(repo.log()?))
    }

    /// Read-only snapshot of this document as of `commit_id`.
    pub fn version(&self, commit_id: &str) -> Result<Document, DocumentError> {
        let id = self.require_persisted()?;
        self.store.find_version(id, commit_id)
    }

    /// Id of a persisted document.
    pub(crate) fn require_persisted(&self) -> Result<&str, DocumentError> {
        match self.id.as_deref() {
            Some(id) if !self.new_record => Ok(id),
            _ => Err(DocumentError::NotPersisted),
        }
    }

    pub(crate) fn ensure_writable(&self) -> Result<(), DocumentError> {
        if self.read_only {
            return Err(DocumentError::ReadOnlyVersion {
                id: self.id.clone().unwrap_or_default(),
                commit_id: self.commit_id.clone().unwrap_or_default(),
            });
        }
        Ok(())
    }

    fn run_after_initialize(&mut self) {
        for hook in self.store.hooks().iter() {
            hook.after_initialize(self);
        }
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("id", &self.id)
            .field("attributes", &self.attributes)
            .field("new_record", &self.new_record)
            .field("commit_id", &self.commit_id)
            .finish()
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#<Document id={}, attributes={}>",
            self.id.as_deref().unwrap_or(""),
            Value::Object(self.attributes.clone())
        )
    }
}

fn id_from_value(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(id) => Some(id),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::config::StorageConfig;
    use crate::hooks::DocumentHooks;

    fn store(root: &std::path::Path) -> DocumentStore {
        DocumentStore::new(StorageConfig::new(root))
    }

    fn attrs(value: Value) -> Attributes {
        value.as_object().cloned().unwrap()
    }

    fn commit_count(doc: &Document) -> usize {
        doc.history().unwrap().map(|h| h.len()).unwrap_or(0)
    }

    #[test]
    fn test_initialize_sets_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let doc = store(dir.path())
            .build(attrs(json!({ "id": "foo", "foo": "bar" })))
            .unwrap();
        assert_eq!(doc.id(), Some("foo"));
        assert_eq!(doc.get("foo"), Some(&json!("bar")));
        assert!(doc.is_new_record());
        assert!(!doc.is_changed());
        assert_eq!(doc.to_param(), Some("foo"));
        assert_eq!(doc.to_json(), json!({ "id": "foo", "foo": "bar" }));
    }

    #[test]
    fn test_tracks_changes() {
        let dir = tempfile::tempdir().unwrap();
        let mut doc = store(dir.path())
            .build(attrs(json!({ "id": "foo", "foo": "bar" })))
            .unwrap();
        doc.set("foo", json!("foo bar")).unwrap();
        assert!(doc.is_changed());
        assert!(doc.attribute_changed("foo"));
        assert!(!doc.attribute_changed("id"));
        assert_eq!(doc.attribute_was("foo"), Some(json!("bar")));

        doc.set_id("bar").unwrap();
        let changes = doc.changes();
        assert_eq!(changes["foo"], (Some(json!("bar")), Some(json!("foo bar"))));
        assert_eq!(changes["id"], (Some(json!("foo")), Some(json!("bar"))));

        assert!(doc.save().unwrap().is_saved());
        assert!(!doc.is_changed());
        assert_eq!(doc.previous_changes().len(), 2);
        assert!(doc.commit_id().is_some());

        doc.set("foo", json!("dirty")).unwrap();
        assert_eq!(doc.commit_id(), None);
        doc.set("foo", json!("foo bar")).unwrap();
        assert!(doc.commit_id().is_some());
    }

    #[test]
    fn test_reverting_a_change_clears_it() {
        let dir = tempfile::tempdir().unwrap();
        let mut doc = store(dir.path())
            .build(attrs(json!({ "id": "foo", "foo": "bar" })))
            .unwrap();
        doc.set("foo", json!("baz")).unwrap();
        doc.set("foo", json!("bar")).unwrap();
        assert!(!doc.is_changed());

        doc.set("foo", json!("baz")).unwrap();
        doc.reset_attribute("foo").unwrap();
        assert_eq!(doc.get("foo"), Some(&json!("bar")));
        assert!(!doc.is_changed());
    }

    #[test]
    fn test_dynamic_attributes_are_tracked() {
        let dir = tempfile::tempdir().unwrap();
        let mut doc = store(dir.path()).build(attrs(json!({ "id": "foo" }))).unwrap();
        assert!(doc.create_attribute("foo", json!("foo bar")).unwrap());
        assert!(!doc.create_attribute("foo", json!("other")).unwrap());
        assert_eq!(doc.changes()["foo"], (None, Some(json!("foo bar"))));
    }

    #[test]
    fn test_reserved_attribute_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let mut doc = store.build(attrs(json!({ "id": "foo" }))).unwrap();
        for name in ["save", "attribute", "id", "a/b", ""] {
            assert!(
                matches!(
                    doc.create_attribute(name, json!(1)),
                    Err(DocumentError::InvalidAttributeName(_))
                ),
                "{name:?} should be rejected"
            );
        }
        assert!(matches!(
            store.build(attrs(json!({ "id": "foo", "destroy": true }))),
            Err(DocumentError::InvalidAttributeName(_))
        ));
    }

    #[test]
    fn test_remove_attribute() {
        let dir = tempfile::tempdir().unwrap();
        let mut doc = store(dir.path())
            .build(attrs(json!({ "id": "foo", "foo": "bar" })))
            .unwrap();
        assert_eq!(doc.remove_attribute("foo").unwrap(), json!("bar"));
        assert!(doc.get("foo").is_none());
        assert!(matches!(doc.remove_attribute("foo"), Err(DocumentError::InvalidAttribute(_))));
        assert!(matches!(doc.remove_attribute("id"), Err(DocumentError::InvalidAttribute(_))));
    }

    #[test]
    fn test_id_is_read_only_after_save() {
        let dir = tempfile::tempdir().unwrap();
        let mut doc = store(dir.path()).build(attrs(json!({ "id": "foo" }))).unwrap();
        doc.set_id("bar").unwrap();
        assert_eq!(doc.id(), Some("bar"));
        doc.save().unwrap();
        assert!(!doc.is_new_record());
        assert!(matches!(doc.set_id("foo"), Err(DocumentError::ReadOnlyId(_))));
        assert!(matches!(doc.set("id", json!("foo")), Err(DocumentError::ReadOnlyId(_))));
        assert_eq!(doc.id(), Some("bar"));
        assert!(dir.path().join("documents/bar").is_dir());
    }

    #[test]
    fn test_save_and_reload_new_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut doc = store(dir.path())
            .build(attrs(json!({ "id": "foo", "foo": "bar" })))
            .unwrap();
        assert!(matches!(doc.save().unwrap(), SaveOutcome::Created(_)));
        doc.set("foo", json!("scratch")).unwrap();
        doc.reload().unwrap();
        assert_eq!(doc.id(), Some("foo"));
        assert_eq!(doc.get("foo"), Some(&json!("bar")));
        assert!(!doc.is_changed());
    }

    #[test]
    fn test_not_saved_without_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut doc = store(dir.path()).build(Attributes::new()).unwrap();
        assert_eq!(doc.save().unwrap(), SaveOutcome::Invalid);
        assert_eq!(doc.errors().get("id"), ["can't be blank", "must be a valid file name"]);
        assert!(matches!(doc.save_strict(), Err(DocumentError::NotSaved(_))));
    }

    #[test]
    fn test_not_saved_with_invalid_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut doc = store(dir.path()).build(Attributes::new()).unwrap();
        for c in ["/", "?", "*", ":", ";", "{", "}", "\\"] {
            doc.set_id(format!("foo{c}")).unwrap();
            assert_eq!(doc.save().unwrap(), SaveOutcome::Invalid);
            assert_eq!(doc.errors().get("id"), ["must be a valid file name"]);
        }
        doc.set_id("..").unwrap();
        assert_eq!(doc.save().unwrap(), SaveOutcome::Invalid);
    }

    #[test]
    fn test_not_saved_with_duplicate_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.create(attrs(json!({ "id": "foo" }))).unwrap();
        let mut doc = store.build(attrs(json!({ "id": "foo" }))).unwrap();
        assert_eq!(doc.save().unwrap(), SaveOutcome::Invalid);
        assert_eq!(doc.errors().get("id"), ["already exists"]);
    }

    #[test]
    fn test_idempotent_save_and_history_growth() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let mut doc = store.build(attrs(json!({ "id": "foo", "counter": 0 }))).unwrap();
        assert!(doc.history().unwrap().is_none());

        doc.save().unwrap();
        let first = doc.commit_id().unwrap().to_string();
        assert_eq!(doc.save().unwrap(), SaveOutcome::Unchanged);
        assert_eq!(commit_count(&doc), 1);

        doc.set("counter", json!(1)).unwrap();
        let outcome = doc.save().unwrap();
        assert!(matches!(outcome, SaveOutcome::Updated(_)));
        assert_eq!(commit_count(&doc), 2);
        assert_ne!(doc.commit_id(), Some(first.as_str()));

        let history = doc.history().unwrap().unwrap();
        assert_eq!(history[0].commit_id, doc.commit_id().unwrap());
        assert_eq!(history[1].commit_id, first);
        assert_eq!(doc.version(&first).unwrap().get("counter"), Some(&json!(0)));
    }

    #[test]
    fn test_user_id_is_author_and_not_stored() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let mut doc = store.create(attrs(json!({ "id": "foo", "foo": "bar" }))).unwrap();
        assert_eq!(doc.history().unwrap().unwrap()[0].author, "anonymous");

        doc.update_attributes(attrs(json!({ "foo": "baz", "user_id": "alice" })))
            .unwrap();
        let history = doc.history().unwrap().unwrap();
        assert_eq!(history[0].author, "alice");

        doc.set("user_id", json!("bob")).unwrap();
        assert_eq!(doc.save().unwrap(), SaveOutcome::Unchanged);

        let found = store.find("foo").unwrap();
        assert!(found.get("user_id").is_none());
        assert_eq!(found.get("foo"), Some(&json!("baz")));
    }

    #[test]
    fn test_destroy() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.create(attrs(json!({ "id": "foo" }))).unwrap();
        let mut doc = store.find("foo").unwrap();
        doc.destroy().unwrap();
        assert!(matches!(store.find("foo"), Err(DocumentError::NotFound(_))));
        assert!(matches!(doc.destroy(), Err(DocumentError::NotFound(_))));
    }

    #[test]
    fn test_display() {
        let dir = tempfile::tempdir().unwrap();
        let doc = store(dir.path())
            .build(attrs(json!({ "id": "foo", "foo": "bar" })))
            .unwrap();
        assert_eq!(doc.to_string(), "#<Document id=foo, attributes={\"foo\":\"bar\"}>");
    }

    struct CountingHooks {
        initialized: AtomicUsize,
        saved: AtomicUsize,
        destroyed: AtomicUsize,
    }

    impl DocumentHooks for CountingHooks {
        fn after_initialize(&self, _document: &mut Document) {
            self.initialized.fetch_add(1, Ordering::SeqCst);
        }
        fn after_save(&self, _document: &Document) {
            self.saved.fetch_add(1, Ordering::SeqCst);
        }
        fn after_destroy(&self, _document: &Document) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_hooks_run() {
        let dir = tempfile::tempdir().unwrap();
        let hooks = Arc::new(CountingHooks {
            initialized: AtomicUsize::new(0),
            saved: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
        });
        let store = store(dir.path()).with_hook(hooks.clone());

        let mut doc = store.create(attrs(json!({ "id": "foo" }))).unwrap();
        let _found = store.find("foo").unwrap();
        doc.destroy().unwrap();

        assert_eq!(hooks.initialized.load(Ordering::SeqCst), 2);
        assert_eq!(hooks.saved.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.destroyed.load(Ordering::SeqCst), 1);
    }
}
