use tracing::{debug, info, instrument};

use super::engine::prune_merges_dir;
use crate::codec::{self, Attributes};
use crate::document::Document;
use crate::errors::DocumentError;
use crate::store::MergeWorkspace;

impl Document {
    /// Resolve the pending merge of `from_id` with the given values.
    ///
    /// Only attributes that are currently conflicted are written. A value
    /// replaces the whole conflicted path, so a map may resolve a conflict on
    /// a plain value and a plain value may resolve one on a map. Every
    /// conflicted attribute must be covered; otherwise nothing is written
    /// and `false` is returned. On success the merge becomes part of this
    /// document's history and the document is reloaded.
    #[instrument(skip(self, resolved), fields(id = self.id().unwrap_or("")))]
    pub fn resolve_conflicts(
        &mut self,
        from_id: &str,
        resolved: &Attributes,
    ) -> Result<bool, DocumentError> {
        self.ensure_writable()?;
        let id = self.require_persisted()?.to_string();
        let target = self.store.existing_path(&id)?;
        let workspace = MergeWorkspace::open(&self.store.merge_path(&id, from_id))?;

        let conflicted = workspace.conflicted_paths()?;
        let updates = codec::encode_subset(&Self::persistable_attributes(resolved), &conflicted)?;
        let unresolved: Vec<&String> = conflicted
            .iter()
            .filter(|path| !updates.keys().any(|entry| codec::paths_overlap(entry, path)))
            .collect();
        if !unresolved.is_empty() {
            debug!(?unresolved, "resolution does not cover every conflict");
            return Ok(false);
        }

        let message = format!("Resolving conflicts from merge with document #{from_id}");
        let Some(commit_id) = workspace.commit_resolution(&updates, &message, &self.author())?
        else {
            return Ok(false);
        };

        workspace.finalize(&target)?;
        prune_merges_dir(&self.store.merges_path(&id))?;
        self.reload()?;
        info!(from_id, commit_id = %commit_id, "conflicts resolved");
        Ok(true)
    }
}
