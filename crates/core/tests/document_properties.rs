//! End-to-end behaviour of documents, forks and merges against real git
//! repositories on disk.

use gitdoc_core::codec::{self, Attributes};
use gitdoc_core::{DocumentError, DocumentStore, SaveOutcome, Segment, StorageConfig};
use serde_json::{json, Value};

fn attrs(value: Value) -> Attributes {
    value.as_object().cloned().expect("attributes must be an object")
}

fn store() -> (tempfile::TempDir, DocumentStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = DocumentStore::new(StorageConfig::new(dir.path()));
    (dir, store)
}

fn history_len(store: &DocumentStore, id: &str) -> usize {
    store.find(id).unwrap().history().unwrap().unwrap().len()
}

#[test]
fn nested_attributes_survive_storage() {
    let (_dir, store) = store();
    let data = json!({
        "id": "foo",
        "foo": { "bar": 45.99, "foo": true, "nil": null, "array": ["1", "2", "3"] },
        "bar": {
            "foo_bar": "bar_foo",
            "abc": {
                "foo": 123,
                "bar": 456,
                "array_of_hashes": [{ "foo": "bar" }, { "foo": "foobar" }]
            }
        },
        "empty": {},
        "text": "line one\nline two\\n literal",
        "utf8": "áéíóúçãõ"
    });

    let created = store.create(attrs(data.clone())).unwrap();
    assert_eq!(created.to_json(), data);
    assert_eq!(store.find("foo").unwrap().to_json(), data);

    let without_id = {
        let mut a = attrs(data);
        a.remove("id");
        a
    };
    assert_eq!(codec::decode(&codec::encode(&without_id).unwrap()).unwrap(), without_id);
}

#[test]
fn save_is_idempotent_and_history_grows_per_change() {
    let (_dir, store) = store();
    let mut doc = store.create(attrs(json!({ "id": "foo", "counter": 0 }))).unwrap();
    assert_eq!(doc.save().unwrap(), SaveOutcome::Unchanged);
    assert_eq!(history_len(&store, "foo"), 1);

    for n in 1..=2 {
        doc.update_attributes(attrs(json!({ "counter": n }))).unwrap();
    }
    doc.update_attributes(attrs(json!({ "counter": 2 }))).unwrap();
    let history = doc.history().unwrap().unwrap();
    assert_eq!(history.len(), 3);

    let expected = [2, 1, 0];
    for (version, counter) in history.iter().zip(expected) {
        let snapshot = doc.version(&version.commit_id).unwrap();
        assert_eq!(snapshot.to_json(), json!({ "id": "foo", "counter": counter }));
    }
}

#[test]
fn fork_starts_with_identical_history() {
    let (_dir, store) = store();
    let mut doc = store.create(attrs(json!({ "id": "foo", "foo": "bar" }))).unwrap();
    doc.update_attributes(attrs(json!({ "foo": "baz" }))).unwrap();

    let fork = doc.create_fork("bar").unwrap();
    assert_eq!(fork.to_json(), json!({ "id": "bar", "foo": "baz" }));
    assert_eq!(fork.history().unwrap(), doc.history().unwrap());
    assert!(matches!(doc.create_fork("bar"), Err(DocumentError::AlreadyExists(_))));
}

#[test]
fn clean_merge_takes_changes_from_the_fork() {
    let (_dir, store) = store();
    let mut doc = store.create(attrs(json!({ "id": "foo", "foo": "bar" }))).unwrap();
    let mut fork = doc.create_fork("bar").unwrap();
    fork.update_attributes(attrs(json!({ "foo": "baz" }))).unwrap();

    assert!(doc.merge("bar").unwrap());
    assert_eq!(doc.to_json(), json!({ "id": "foo", "foo": "baz" }));
    assert_eq!(store.find("bar").unwrap().to_json(), json!({ "id": "bar", "foo": "baz" }));
}

#[test]
fn merge_of_disjoint_edits_keeps_both() {
    let (_dir, store) = store();
    let mut doc = store
        .create(attrs(json!({ "id": "foo", "a": "1", "b": "1" })))
        .unwrap();
    let mut fork = doc.create_fork("bar").unwrap();
    doc.update_attributes(attrs(json!({ "a": "2" }))).unwrap();
    fork.update_attributes(attrs(json!({ "b": "3", "c": { "d": true } })))
        .unwrap();

    assert!(doc.merge("bar").unwrap());
    assert_eq!(
        store.find("foo").unwrap().to_json(),
        json!({ "id": "foo", "a": "2", "b": "3", "c": { "d": true } })
    );
}

#[test]
fn multi_paragraph_text_merges_line_by_line() {
    let (_dir, store) = store();
    let mut doc = store.create(attrs(json!({ "id": "foo", "foo": "" }))).unwrap();
    doc.update_attributes(attrs(json!({
        "foo": "Parágrafo 1\nFoi?\n\nParágrafo 2\nE agora?\n\nParágrafo 3\nFoi mesmo?"
    })))
    .unwrap();

    let mut fork = doc.create_fork("bar").unwrap();
    fork.update_attributes(attrs(json!({
        "foo": "Parágrafo 1\nFoi?\n\nParágrafo 2\nE agora?\n\nParágrafo 3\nFoi mesmo? Será?"
    })))
    .unwrap();
    doc.update_attributes(attrs(json!({
        "foo": "Parágrafo 1\nFoi? Veremos!\n\nParágrafo 2\nE agora?\n\nParágrafo 3\nFoi mesmo?"
    })))
    .unwrap();

    assert!(doc.merge("bar").unwrap());
    assert_eq!(
        doc.get("foo"),
        Some(&json!(
            "Parágrafo 1\nFoi? Veremos!\n\nParágrafo 2\nE agora?\n\nParágrafo 3\nFoi mesmo? Será?"
        ))
    );
    assert_eq!(
        store.find("bar").unwrap().get("foo"),
        Some(&json!(
            "Parágrafo 1\nFoi?\n\nParágrafo 2\nE agora?\n\nParágrafo 3\nFoi mesmo? Será?"
        ))
    );
}

#[test]
fn conflicting_merge_then_resolution() {
    let (_dir, store) = store();
    let mut doc = store.create(attrs(json!({ "id": "foo", "foo": "bar" }))).unwrap();
    let mut fork = doc.create_fork("bar").unwrap();
    doc.update_attributes(attrs(json!({ "foo": "baz" }))).unwrap();
    fork.update_attributes(attrs(json!({ "foo": "zab" }))).unwrap();

    assert!(!doc.merge("bar").unwrap());
    let pending = doc.pending_merges().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].from_id, "bar");
    let record = pending[0].record("foo").unwrap();
    assert_eq!(record.conflict_count, 1);
    assert_eq!(record.ours(), ["\"baz\""]);
    assert_eq!(record.theirs(), ["\"zab\""]);
    assert!(matches!(record.segments[0], Segment::Ours(_)));

    // a second merge from the same source restarts the pending merge
    assert!(!doc.merge("bar").unwrap());
    assert_eq!(doc.pending_merges().unwrap().len(), 1);

    assert!(doc.resolve_conflicts("bar", &attrs(json!({ "foo": "abc" }))).unwrap());
    assert!(doc.pending_merges().unwrap().is_empty());
    assert_eq!(doc.get("foo"), Some(&json!("abc")));
    assert_eq!(store.find("foo").unwrap().get("foo"), Some(&json!("abc")));
}

#[test]
fn nested_conflicts_are_reported_nested() {
    let (_dir, store) = store();
    let mut doc = store
        .create(attrs(json!({ "id": "foo", "a": { "b": { "c": 1 } } })))
        .unwrap();
    let mut fork = doc.create_fork("bar").unwrap();
    doc.update_attributes(attrs(json!({ "a": { "b": { "c": 2 } } })))
        .unwrap();
    fork.update_attributes(attrs(json!({ "a": { "b": { "c": 3 } } })))
        .unwrap();

    assert!(!doc.merge("bar").unwrap());
    let pending = doc.pending_merge("bar").unwrap();
    let record = pending.record("a/b/c").unwrap();
    assert_eq!(record.ours(), ["2"]);
    assert_eq!(record.theirs(), ["3"]);

    let json = serde_json::to_value(&pending).unwrap();
    assert_eq!(json["conflicts"]["a"]["b"]["c"]["conflict_count"], 1);
}

#[test]
fn partial_resolution_leaves_values_untouched() {
    let (_dir, store) = store();
    let mut doc = store
        .create(attrs(json!({ "id": "foo", "x": "0", "y": "0" })))
        .unwrap();
    let mut fork = doc.create_fork("bar").unwrap();
    doc.update_attributes(attrs(json!({ "x": "ours", "y": "ours" })))
        .unwrap();
    fork.update_attributes(attrs(json!({ "x": "theirs", "y": "theirs" })))
        .unwrap();
    assert!(!doc.merge("bar").unwrap());

    assert!(!doc
        .resolve_conflicts("bar", &attrs(json!({ "x": "merged" })))
        .unwrap());
    let stored = store.find("foo").unwrap();
    assert_eq!(stored.get("x"), Some(&json!("ours")));
    assert_eq!(stored.get("y"), Some(&json!("ours")));
    assert_eq!(doc.pending_merges().unwrap().len(), 1);
}

#[test]
fn merge_needed_tracks_fork_edits() {
    let (_dir, store) = store();
    let doc = store.create(attrs(json!({ "id": "foo", "foo": "bar" }))).unwrap();
    let mut fork = doc.create_fork("bar").unwrap();
    assert!(!doc.merge_needed("bar").unwrap());

    fork.update_attributes(attrs(json!({ "foo": "baz" }))).unwrap();
    assert!(doc.merge_needed("bar").unwrap());
}

#[test]
fn missing_documents_are_not_found() {
    let (_dir, store) = store();
    assert!(matches!(store.find("nope"), Err(DocumentError::NotFound(_))));
    let mut doc = store.create(attrs(json!({ "id": "foo" }))).unwrap();
    assert!(matches!(doc.merge("nope"), Err(DocumentError::NotFound(_))));
    assert!(matches!(doc.version("deadbeef"), Err(DocumentError::NotFound(_))));
    doc.destroy().unwrap();
    assert!(matches!(doc.destroy(), Err(DocumentError::NotFound(_))));
}
