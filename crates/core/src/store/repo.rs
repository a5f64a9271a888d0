//! Per-document bare repositories via `git2`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use git2::{Commit, ErrorCode, ObjectType, Oid, Repository, Signature, Sort, Tree};
use tracing::{debug, info, instrument};

use crate::codec::{TreeEntries, PATH_SEPARATOR};
use crate::errors::StoreError;
use crate::models::Version;

const BLOB_MODE: i32 = 0o100644;
const TREE_MODE: i32 = 0o040000;

/// Commit author identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Author {
    /// Build `name <name@domain>`.
    pub fn new(name: &str, email_domain: &str) -> Self {
        Self {
            name: name.to_string(),
            email: format!("{name}@{email_domain}"),
        }
    }

    pub(crate) fn signature(&self) -> Result<Signature<'static>, StoreError> {
        Ok(Signature::now(&self.name, &self.email)?)
    }
}

impl std::fmt::Display for Author {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// In-memory directory layout used to assemble nested trees.
enum TreeNode {
    Blob(Oid),
    Dir(BTreeMap<String, TreeNode>),
}

/// A document's bare repository holding its full version history.
pub struct DocumentRepo {
    repo: Repository,
    path: PathBuf,
}

impl DocumentRepo {
    /// Create an empty bare repository at `path`.
    #[instrument(fields(path = %path.display()))]
    pub fn init(path: &Path) -> Result<Self, StoreError> {
        if path.exists() {
            return Err(StoreError::AlreadyExists(path.display().to_string()));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let repo = Repository::init_bare(path)?;
        info!("initialized document repository");
        Ok(Self {
            repo,
            path: path.to_path_buf(),
        })
    }

    /// Open the existing bare repository at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if !path.is_dir() {
            return Err(StoreError::NotFound(path.display().to_string()));
        }
        let repo = Repository::open_bare(path)
            .map_err(|_| StoreError::NotFound(path.display().to_string()))?;
        Ok(Self {
            repo,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Id of the newest commit, or `None` for a repository without commits.
    pub fn head_id(&self) -> Result<Option<String>, StoreError> {
        Ok(head_oid(&self.repo)?.map(|oid| oid.to_string()))
    }

    /// Write `entries` as the complete new tree and commit it on `HEAD`.
    #[instrument(skip(self, entries, message, author), fields(path = %self.path.display()))]
    pub fn commit_snapshot(
        &self,
        entries: &TreeEntries,
        message: &str,
        author: &Author,
        parent: Option<&str>,
    ) -> Result<String, StoreError> {
        let tree_oid = self.write_tree(entries)?;
        let tree = self.repo.find_tree(tree_oid)?;
        let signature = author.signature()?;
        let parent_commit = parent.map(|id| self.find_commit(id)).transpose()?;
        let parents: Vec<&Commit> = parent_commit.iter().collect();
        let oid = self
            .repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;
        info!(sha = %oid, files = entries.len(), "created commit");
        Ok(oid.to_string())
    }

    /// Full history reachable from `HEAD`, newest first.
    pub fn log(&self) -> Result<Vec<Version>, StoreError> {
        let Some(head) = head_oid(&self.repo)? else {
            return Ok(Vec::new());
        };
        let mut revwalk = self.repo.revwalk()?;
        revwalk.push(head)?;
        revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;

        let mut versions = Vec::new();
        for oid_result in revwalk {
            let commit = self.repo.find_commit(oid_result?)?;
            let author = commit.author();
            versions.push(Version {
                commit_id: commit.id().to_string(),
                author: author.name().unwrap_or("").to_string(),
                timestamp: DateTime::<Utc>::from_timestamp(author.when().seconds(), 0)
                    .unwrap_or_default(),
            });
        }
        debug!(count = versions.len(), "collected history");
        Ok(versions)
    }

    /// Read the tree of `commit_id`, or of the newest commit when `None`.
    pub fn read_tree(&self, commit_id: Option<&str>) -> Result<TreeEntries, StoreError> {
        let commit = match commit_id {
            Some(id) => self.find_commit(id)?,
            None => {
                let oid = head_oid(&self.repo)?
                    .ok_or_else(|| StoreError::CommitNotFound("HEAD".into()))?;
                self.repo.find_commit(oid)?
            }
        };
        let mut entries = TreeEntries::new();
        self.collect_tree(&commit.tree()?, "", &mut entries)?;
        Ok(entries)
    }

    /// Duplicate this repository, with its full history, at `new_path`.
    #[instrument(skip(self), fields(path = %self.path.display(), new_path = %new_path.display()))]
    pub fn fork(&self, new_path: &Path) -> Result<DocumentRepo, StoreError> {
        if new_path.exists() {
            return Err(StoreError::AlreadyExists(new_path.display().to_string()));
        }
        let repo = bare_clone(&self.path, new_path)?;
        info!("forked document repository");
        Ok(DocumentRepo {
            repo,
            path: new_path.to_path_buf(),
        })
    }

    /// Delete the repository from disk.
    pub fn destroy(self) -> Result<(), StoreError> {
        let path = self.path;
        drop(self.repo);
        fs::remove_dir_all(&path)?;
        info!(path = %path.display(), "destroyed document repository");
        Ok(())
    }

    fn find_commit(&self, id: &str) -> Result<Commit<'_>, StoreError> {
        let oid = Oid::from_str(id).map_err(|_| StoreError::CommitNotFound(id.to_string()))?;
        self.repo
            .find_commit(oid)
            .map_err(|_| StoreError::CommitNotFound(id.to_string()))
    }

    fn write_tree(&self, entries: &TreeEntries) -> Result<Oid, StoreError> {
        let mut root = BTreeMap::new();
        for (path, content) in entries {
            let blob = self.repo.blob(content.as_bytes())?;
            insert_node(&mut root, path, blob);
        }
        self.write_dir(&root)
    }

    fn write_dir(&self, dir: &BTreeMap<String, TreeNode>) -> Result<Oid, StoreError> {
        let mut builder = self.repo.treebuilder(None)?;
        for (name, node) in dir {
            let (oid, mode) = match node {
                TreeNode::Blob(oid) => (*oid, BLOB_MODE),
                TreeNode::Dir(children) => (self.write_dir(children)?, TREE_MODE),
            };
            builder.insert(name, oid, mode)?;
        }
        Ok(builder.write()?)
    }

    fn collect_tree(
        &self,
        tree: &Tree<'_>,
        prefix: &str,
        entries: &mut TreeEntries,
    ) -> Result<(), StoreError> {
        for entry in tree.iter() {
            let Some(name) = entry.name() else { continue };
            let path = if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{prefix}{PATH_SEPARATOR}{name}")
            };
            match entry.kind() {
                Some(ObjectType::Tree) => {
                    let subtree = self.repo.find_tree(entry.id())?;
                    self.collect_tree(&subtree, &path, entries)?;
                }
                Some(ObjectType::Blob) => {
                    let blob = self.repo.find_blob(entry.id())?;
                    entries.insert(path, String::from_utf8_lossy(blob.content()).into_owned());
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn insert_node(root: &mut BTreeMap<String, TreeNode>, path: &str, blob: Oid) {
    let mut segments = path.split(PATH_SEPARATOR).peekable();
    let mut current = root;
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_string(), TreeNode::Blob(blob));
            return;
        }
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| TreeNode::Dir(BTreeMap::new()));
        if let TreeNode::Blob(_) = slot {
            *slot = TreeNode::Dir(BTreeMap::new());
        }
        current = match slot {
            TreeNode::Dir(children) => children,
            TreeNode::Blob(_) => return,
        };
    }
}

/// Resolve `HEAD` to a commit id, treating an unborn branch as `None`.
pub(crate) fn head_oid(repo: &Repository) -> Result<Option<Oid>, StoreError> {
    match repo.head() {
        Ok(head) => Ok(Some(head.peel_to_commit()?.id())),
        Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Local clone URL for a repository path.
pub(crate) fn path_url(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Bare-clone `source` into `dest` and detach it from its origin.
pub(crate) fn bare_clone(source: &Path, dest: &Path) -> Result<Repository, StoreError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let repo = git2::build::RepoBuilder::new()
        .bare(true)
        .clone(&path_url(source), dest)?;
    repo.remote_delete("origin")?;
    Ok(repo)
}
