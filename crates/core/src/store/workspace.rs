//! Scratch merge workspaces.
//!
//! A workspace is a non-bare clone of the target document in which the
//! source document's history is merged. Conflicts stay in its index and
//! working tree until they are resolved; the result then replaces the
//! target's repository.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{Commit, ErrorCode, Oid, Repository};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::markers::parse_conflict_markers;
use super::repo::{bare_clone, head_oid, path_url, Author};
use crate::codec::{paths_overlap, TreeEntries, PATH_SEPARATOR};
use crate::errors::StoreError;
use crate::models::{ConflictRecord, Segment};

/// Remote-tracking ref the source document's head is fetched into.
const SOURCE_REF: &str = "refs/remotes/merge/head";
const SOURCE_REMOTE: &str = "merge";
/// Bit offset of the merge stage in an index entry's flags.
const STAGE_SHIFT: u16 = 12;

/// Outcome of a merge attempt or of a conflict check.
#[derive(Debug, Clone, Default)]
pub struct MergeReport {
    pub clean: bool,
    /// Conflict detail per conflicted file path.
    pub conflicts: BTreeMap<String, ConflictRecord>,
}

/// Blob ids staged for each side of one conflicted path.
struct ConflictSides {
    ours: Option<Oid>,
    theirs: Option<Oid>,
}

/// A working-copy clone used to merge one document into another.
pub struct MergeWorkspace {
    repo: Repository,
    path: PathBuf,
}

impl MergeWorkspace {
    /// Open an existing workspace.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if !path.is_dir() {
            return Err(StoreError::NotFound(path.display().to_string()));
        }
        let repo =
            Repository::open(path).map_err(|_| StoreError::NotFound(path.display().to_string()))?;
        Ok(Self {
            repo,
            path: path.to_path_buf(),
        })
    }

    /// Merge `source`'s history into a fresh clone of `target` at `work_dir`.
    ///
    /// Any previous workspace at `work_dir` is discarded first. A clean normal
    /// merge is committed in the workspace straight away; a conflicted one is
    /// left in progress.
    #[instrument(skip(author, message), fields(
        target = %target.display(),
        source = %source.display(),
        work_dir = %work_dir.display()
    ))]
    pub fn attempt(
        target: &Path,
        source: &Path,
        work_dir: &Path,
        author: &Author,
        message: &str,
    ) -> Result<(Self, MergeReport), StoreError> {
        for repo_path in [target, source] {
            if !repo_path.is_dir() {
                return Err(StoreError::NotFound(repo_path.display().to_string()));
            }
        }
        if work_dir.exists() {
            warn!("discarding previous merge workspace");
            fs::remove_dir_all(work_dir)?;
        }
        if let Some(parent) = work_dir.parent() {
            fs::create_dir_all(parent)?;
        }

        let repo = RepoBuilder::new().clone(&path_url(target), work_dir)?;
        fetch_source_head(&repo, source)?;
        merge_source_head(&repo, author, message)?;

        let workspace = Self {
            repo,
            path: work_dir.to_path_buf(),
        };
        let report = workspace.report()?;
        info!(clean = report.clean, conflicts = report.conflicts.len(), "merge attempted");
        Ok((workspace, report))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Paths with unresolved conflict entries in the index.
    pub fn conflicted_paths(&self) -> Result<BTreeSet<String>, StoreError> {
        Ok(self.conflict_sides()?.into_keys().collect())
    }

    /// Re-derive the conflict status from the index and working tree.
    ///
    /// A conflicted file carrying markers is parsed; any other conflict
    /// (a file on one side and a directory on the other, or a deletion) is
    /// described from the blobs staged for each side.
    pub fn report(&self) -> Result<MergeReport, StoreError> {
        let mut conflicts = BTreeMap::new();
        for (path, sides) in self.conflict_sides()? {
            let record = match self.read_markers(&path)? {
                Some(record) if record.conflict_count > 0 => record,
                _ => ConflictRecord {
                    conflict_count: 1,
                    section_count: 1,
                    segments: vec![
                        Segment::Ours(self.blob_lines(sides.ours)?),
                        Segment::Theirs(self.blob_lines(sides.theirs)?),
                    ],
                },
            };
            conflicts.insert(path, record);
        }
        Ok(MergeReport {
            clean: conflicts.is_empty(),
            conflicts,
        })
    }

    /// Write `updates` into the working tree, stage them, and commit.
    ///
    /// Each update replaces whatever sits at its path, and each conflicted
    /// path overlapping an update is cleared first, so a leaf may replace a
    /// directory and the other way round. Returns `None` without committing
    /// when conflicts remain after staging.
    #[instrument(skip(self, updates, message, author), fields(work_dir = %self.path.display()))]
    pub fn commit_resolution(
        &self,
        updates: &TreeEntries,
        message: &str,
        author: &Author,
    ) -> Result<Option<String>, StoreError> {
        let mut cleared: BTreeSet<String> = self
            .conflicted_paths()?
            .into_iter()
            .filter(|path| updates.keys().any(|update| paths_overlap(update, path)))
            .collect();
        cleared.extend(updates.keys().cloned());

        let mut index = self.repo.index()?;
        let stale: Vec<(String, i32)> = index
            .iter()
            .filter_map(|entry| {
                let path = String::from_utf8_lossy(&entry.path).into_owned();
                let stage = i32::from((entry.flags >> STAGE_SHIFT) & 0x3);
                cleared
                    .iter()
                    .any(|prefix| path == *prefix || is_beneath(&path, prefix))
                    .then_some((path, stage))
            })
            .collect();
        for (path, stage) in &stale {
            index.remove(Path::new(path), *stage)?;
        }
        for path in &cleared {
            remove_from_work_tree(&self.path.join(path))?;
        }

        for (path, content) in updates {
            let file = self.path.join(path);
            if let Some(parent) = file.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&file, content)?;
            index.add_path(Path::new(path))?;
        }
        index.write()?;
        if index.has_conflicts() {
            debug!("conflicts remain after staging resolution");
            return Ok(None);
        }

        let tree = self.repo.find_tree(index.write_tree()?)?;
        let mut parent_ids: Vec<Oid> = head_oid(&self.repo)?.into_iter().collect();
        parent_ids.extend(merge_head(&self.repo)?);
        let parents = parent_ids
            .iter()
            .map(|oid| self.repo.find_commit(*oid))
            .collect::<Result<Vec<Commit>, _>>()?;
        let parent_refs: Vec<&Commit> = parents.iter().collect();

        let signature = author.signature()?;
        let oid = self.repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &parent_refs,
        )?;
        self.repo.cleanup_state()?;
        info!(sha = %oid, files = updates.len(), "committed conflict resolution");
        Ok(Some(oid.to_string()))
    }

    fn conflict_sides(&self) -> Result<BTreeMap<String, ConflictSides>, StoreError> {
        let index = self.repo.index()?;
        let mut sides = BTreeMap::new();
        if !index.has_conflicts() {
            return Ok(sides);
        }
        for conflict in index.conflicts()? {
            let conflict = conflict?;
            let path = [&conflict.our, &conflict.their, &conflict.ancestor]
                .into_iter()
                .flatten()
                .next()
                .map(|entry| String::from_utf8_lossy(&entry.path).into_owned());
            if let Some(path) = path {
                sides.insert(
                    path,
                    ConflictSides {
                        ours: conflict.our.as_ref().map(|entry| entry.id),
                        theirs: conflict.their.as_ref().map(|entry| entry.id),
                    },
                );
            }
        }
        Ok(sides)
    }

    fn read_markers(&self, path: &str) -> Result<Option<ConflictRecord>, StoreError> {
        let file = self.path.join(path);
        if !file.is_file() {
            return Ok(None);
        }
        let bytes = fs::read(&file)?;
        Ok(Some(parse_conflict_markers(&String::from_utf8_lossy(&bytes))))
    }

    fn blob_lines(&self, oid: Option<Oid>) -> Result<Vec<String>, StoreError> {
        let Some(oid) = oid else {
            return Ok(Vec::new());
        };
        let blob = self.repo.find_blob(oid)?;
        Ok(String::from_utf8_lossy(blob.content())
            .lines()
            .map(str::to_string)
            .collect())
    }

    /// Replace the repository at `target` with this workspace's history and
    /// delete the workspace.
    #[instrument(skip(self), fields(work_dir = %self.path.display(), target = %target.display()))]
    pub fn finalize(self, target: &Path) -> Result<(), StoreError> {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let token = Uuid::new_v4();
        let staging = target.with_file_name(format!(".{name}.{token}.staging"));
        let retired = target.with_file_name(format!(".{name}.{token}.retired"));

        drop(bare_clone(&self.path, &staging)?);
        if target.exists() {
            fs::rename(target, &retired)?;
        }
        fs::rename(&staging, target)?;
        if retired.exists() {
            fs::remove_dir_all(&retired)?;
        }

        let work_dir = self.path;
        drop(self.repo);
        fs::remove_dir_all(&work_dir)?;
        info!("merge finalized");
        Ok(())
    }

    /// Delete the workspace without touching the target.
    pub fn discard(self) -> Result<(), StoreError> {
        let work_dir = self.path;
        drop(self.repo);
        fs::remove_dir_all(&work_dir)?;
        debug!(work_dir = %work_dir.display(), "merge workspace discarded");
        Ok(())
    }
}

/// Number of commits reachable from `source` that `target` does not have.
pub fn divergence_count(target: &Path, source: &Path) -> Result<usize, StoreError> {
    let open = |path: &Path| {
        Repository::open_bare(path).map_err(|_| StoreError::NotFound(path.display().to_string()))
    };
    let target_repo = open(target)?;
    let source_repo = open(source)?;

    let Some(source_head) = head_oid(&source_repo)? else {
        return Ok(0);
    };
    let mut revwalk = source_repo.revwalk()?;
    revwalk.push(source_head)?;
    if let Some(target_head) = head_oid(&target_repo)? {
        if source_repo.odb()?.exists(target_head) {
            revwalk.hide(target_head)?;
        }
    }

    let target_odb = target_repo.odb()?;
    let mut count = 0;
    for oid in revwalk {
        if !target_odb.exists(oid?) {
            count += 1;
        }
    }
    debug!(count, "computed divergence");
    Ok(count)
}

fn fetch_source_head(repo: &Repository, source: &Path) -> Result<(), StoreError> {
    let source_repo = Repository::open_bare(source)
        .map_err(|_| StoreError::NotFound(source.display().to_string()))?;
    let head = source_repo.head()?;
    let head_name = head
        .name()
        .ok_or_else(|| StoreError::CommitNotFound("HEAD".into()))?;

    let mut remote = repo.remote(SOURCE_REMOTE, &path_url(source))?;
    let refspec = format!("+{head_name}:{SOURCE_REF}");
    remote.fetch(&[refspec.as_str()], None, None)?;
    debug!(refspec, "fetched source history");
    Ok(())
}

fn merge_source_head(repo: &Repository, author: &Author, message: &str) -> Result<(), StoreError> {
    let source_ref = repo.find_reference(SOURCE_REF)?;
    let source_commit = repo.reference_to_annotated_commit(&source_ref)?;
    let (analysis, _) = repo.merge_analysis(&[&source_commit])?;

    if analysis.is_up_to_date() {
        debug!("target already contains source history");
        return Ok(());
    }

    if analysis.is_fast_forward() {
        let head = repo.head()?;
        let head_name = head.name().unwrap_or("HEAD").to_string();
        let mut head_ref = repo.find_reference(&head_name)?;
        head_ref.set_target(source_commit.id(), "gitdoc: fast-forward merge")?;
        repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
        debug!(sha = %source_commit.id(), "fast-forwarded");
        return Ok(());
    }

    let mut checkout = CheckoutBuilder::new();
    checkout.allow_conflicts(true).conflict_style_merge(true);
    repo.merge(&[&source_commit], None, Some(&mut checkout))?;

    let mut index = repo.index()?;
    index.write()?;
    if index.has_conflicts() {
        debug!("merge left conflicts in workspace");
        return Ok(());
    }

    let tree = repo.find_tree(index.write_tree()?)?;
    let ours = repo.head()?.peel_to_commit()?;
    let theirs = repo.find_commit(source_commit.id())?;
    let signature = author.signature()?;
    repo.commit(
        Some("HEAD"),
        &signature,
        &signature,
        message,
        &tree,
        &[&ours, &theirs],
    )?;
    repo.cleanup_state()?;
    debug!("committed clean merge");
    Ok(())
}

fn merge_head(repo: &Repository) -> Result<Option<Oid>, StoreError> {
    match repo.find_reference("MERGE_HEAD") {
        Ok(reference) => Ok(reference.target()),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn is_beneath(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.starts_with(PATH_SEPARATOR))
}

fn remove_from_work_tree(path: &Path) -> Result<(), StoreError> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path)?,
        Ok(_) => fs::remove_file(path)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
