use std::fs;
use std::path::Path;

use tracing::{debug, info, instrument};

use super::tree::build_conflict_tree;
use crate::document::{is_valid_id, Document};
use crate::errors::DocumentError;
use crate::models::PendingMerge;
use crate::store::{divergence_count, DocumentRepo, MergeWorkspace};

impl Document {
    /// Copy this document, with its full history, to a new id.
    #[instrument(skip(self), fields(id = self.id().unwrap_or("")))]
    pub fn create_fork(&self, new_id: &str) -> Result<Document, DocumentError> {
        let id = self.require_persisted()?;
        if !is_valid_id(new_id) {
            return Err(DocumentError::InvalidId(new_id.to_string()));
        }
        let source = DocumentRepo::open(&self.store.existing_path(id)?)?;
        let target = self.store.document_path(new_id);
        if target.exists() {
            return Err(DocumentError::AlreadyExists(new_id.to_string()));
        }

        source.fork(&target)?;
        info!(new_id, "document forked");
        self.store.find(new_id)
    }

    /// Merge the history of `from_id` into this document.
    ///
    /// Returns `true` when the merge was clean and is now part of this
    /// document's history. On conflicts returns `false` and leaves a pending
    /// merge; nothing is committed to this document until it is resolved.
    #[instrument(skip(self), fields(id = self.id().unwrap_or("")))]
    pub fn merge(&mut self, from_id: &str) -> Result<bool, DocumentError> {
        self.ensure_writable()?;
        let id = self.require_persisted()?.to_string();
        let target = self.store.existing_path(&id)?;
        let source = self.store.existing_path(from_id)?;
        let work_dir = self.store.merge_path(&id, from_id);
        let message = format!("Merging document #{from_id} into #{id}");

        let (workspace, report) =
            MergeWorkspace::attempt(&target, &source, &work_dir, &self.author(), &message)?;
        if !report.clean {
            info!(from_id, conflicts = report.conflicts.len(), "merge left conflicts");
            return Ok(false);
        }

        workspace.finalize(&target)?;
        prune_merges_dir(&self.store.merges_path(&id))?;
        self.reload()?;
        Ok(true)
    }

    /// Whether `from_id` has commits this document lacks.
    pub fn merge_needed(&self, from_id: &str) -> Result<bool, DocumentError> {
        let id = self.require_persisted()?;
        let target = self.store.existing_path(id)?;
        let source = self.store.existing_path(from_id)?;
        Ok(divergence_count(&target, &source)? > 0)
    }

    /// Every pending merge into this document, ordered by source id.
    pub fn pending_merges(&self) -> Result<Vec<PendingMerge>, DocumentError> {
        let id = self.require_persisted()?;
        let dir = self.store.merges_path(id);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut from_ids = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| DocumentError::Store(e.into()))? {
            let entry = entry.map_err(|e| DocumentError::Store(e.into()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().is_dir() && !name.starts_with('.') {
                from_ids.push(name);
            }
        }
        from_ids.sort();

        from_ids
            .iter()
            .map(|from_id| self.pending_merge(from_id))
            .collect()
    }

    /// The pending merge of `from_id` into this document.
    pub fn pending_merge(&self, from_id: &str) -> Result<PendingMerge, DocumentError> {
        let id = self.require_persisted()?;
        let workspace = MergeWorkspace::open(&self.store.merge_path(id, from_id))?;
        let report = workspace.report()?;
        Ok(PendingMerge {
            from_id: from_id.to_string(),
            conflicts: build_conflict_tree(report.conflicts),
        })
    }

    /// Drop the pending merge of `from_id`, if any. Returns whether one existed.
    pub fn abort_merge(&self, from_id: &str) -> Result<bool, DocumentError> {
        let id = self.id().ok_or(DocumentError::NotPersisted)?;
        let path = self.store.merge_path(id, from_id);
        if !path.exists() {
            return Ok(false);
        }
        MergeWorkspace::open(&path)?.discard()?;
        prune_merges_dir(&self.store.merges_path(id))?;
        info!(from_id, "pending merge aborted");
        Ok(true)
    }
}

/// Remove `<root>/merges/<id>` once it holds no workspaces.
pub(super) fn prune_merges_dir(dir: &Path) -> Result<(), DocumentError> {
    let empty = match fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_none(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(DocumentError::Store(e.into())),
    };
    if empty {
        fs::remove_dir(dir).map_err(|e| DocumentError::Store(e.into()))?;
        debug!(dir = %dir.display(), "removed empty merges directory");
    }
    Ok(())
}
