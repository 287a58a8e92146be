//! Repository access built on top of libgit2.
//!
//! [`VersionControl`] is the narrow read interface the rest of the crate
//! depends on; [`Repository`] implements it for a git working tree.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use git2::{
    Delta, Diff, DiffOptions, ErrorClass, ErrorCode, ObjectType, Repository as GitRepository,
    Sort, Tree,
};

use crate::{Error, Result, Revision, RevisionId, WORKING_TREE_REF};

/// Read-only view of a version-controlled design tree.
pub trait VersionControl {
    /// Absolute, canonical path of the working tree root.
    fn root(&self) -> &Path;

    /// Resolve a symbolic name (branch, tag, `HEAD~2`, hash, `WORK`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownRevision`] when the name does not resolve.
    fn resolve_ref(&self, name: &str) -> Result<Revision>;

    /// Repository-relative paths whose content differs between two revisions.
    ///
    /// # Errors
    ///
    /// Propagates failures reading either side.
    fn list_changed_paths(&self, old: &Revision, new: &Revision) -> Result<BTreeSet<String>>;

    /// File bytes at a revision, or `None` when the path is absent there.
    ///
    /// # Errors
    ///
    /// Propagates failures reading the revision.
    fn read_blob(&self, revision: &Revision, path: &str) -> Result<Option<Vec<u8>>>;

    /// Up to `limit` most recent commits reachable from `HEAD` (following
    /// first parents) whose own change touches any of `paths`, newest first.
    ///
    /// # Errors
    ///
    /// Propagates history traversal failures.
    fn touching_commits(&self, paths: &[String], limit: usize) -> Result<Vec<Revision>>;

    /// First parent of a commit; for the working tree this is `HEAD`.
    ///
    /// # Errors
    ///
    /// Propagates failures looking up the commit.
    fn first_parent(&self, revision: &Revision) -> Result<Option<Revision>>;
}

/// Handle to the git repository containing the design files.
pub struct Repository {
    inner: GitRepository,
    root: PathBuf,
}

impl Repository {
    /// Open the repository containing `path`, searching parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRepository`] when no repository encloses the
    /// path and [`Error::BareRepository`] for repositories without a working
    /// tree.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let original = path.as_ref();
        let canonical = canonicalize_lenient(original)?;
        let start = if !canonical.is_dir() {
            canonical.parent().map_or_else(|| canonical.clone(), Path::to_path_buf)
        } else {
            canonical.clone()
        };

        let repo = match GitRepository::discover(&start) {
            Ok(repo) => repo,
            Err(err)
                if err.class() == ErrorClass::Repository && err.code() == ErrorCode::NotFound =>
            {
                return Err(Error::InvalidRepository {
                    path: display_path(&canonical),
                })
            }
            Err(err) => return Err(Error::from(err)),
        };

        let workdir = repo.workdir().ok_or_else(|| Error::BareRepository {
            path: display_path(&canonical),
        })?;
        let root = std::fs::canonicalize(workdir).map_err(|source| Error::io(workdir, source))?;

        Ok(Self { inner: repo, root })
    }

    /// Convert a filesystem path into a repository-relative, `/`-separated
    /// path. The file itself does not need to exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for paths outside the working tree.
    pub fn relative_path(&self, path: &Path) -> Result<String> {
        relative_to(&self.root, path)
    }

    fn commit(&self, oid: &str) -> Result<git2::Commit<'_>> {
        let id = git2::Oid::from_str(oid)?;
        Ok(self.inner.find_commit(id)?)
    }

    fn tree(&self, revision: &Revision) -> Result<Option<Tree<'_>>> {
        match &revision.id {
            RevisionId::Commit(oid) => Ok(Some(self.commit(oid)?.tree()?)),
            RevisionId::WorkingTree => Ok(None),
        }
    }

    fn head_revision(&self) -> Result<Option<Revision>> {
        let head = match self.inner.head() {
            Ok(head) => head,
            Err(err)
                if matches!(
                    (err.class(), err.code()),
                    (
                        ErrorClass::Reference,
                        ErrorCode::NotFound | ErrorCode::UnbornBranch
                    )
                ) =>
            {
                return Ok(None)
            }
            Err(err) => return Err(Error::from(err)),
        };
        let commit = head.resolve()?.peel_to_commit()?;
        Ok(Some(commit_to_revision(&commit, Some("HEAD".to_owned()))))
    }

    fn read_working_file(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let full = self.root.join(path);
        match std::fs::read(&full) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(Error::io(&full, source)),
        }
    }

    fn workdir_diff(&self, tree: &Tree<'_>) -> Result<Diff<'_>> {
        let mut opts = DiffOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);
        Ok(self
            .inner
            .diff_tree_to_workdir_with_index(Some(tree), Some(&mut opts))?)
    }
}

impl VersionControl for Repository {
    fn root(&self) -> &Path {
        &self.root
    }

    fn resolve_ref(&self, name: &str) -> Result<Revision> {
        if name == WORKING_TREE_REF {
            return Ok(Revision::working_tree());
        }

        let object = match self.inner.revparse_single(name) {
            Ok(object) => object,
            Err(err)
                if matches!(
                    err.code(),
                    ErrorCode::NotFound | ErrorCode::Ambiguous | ErrorCode::InvalidSpec
                ) =>
            {
                return Err(Error::UnknownRevision {
                    name: name.to_owned(),
                })
            }
            Err(err) => return Err(Error::from(err)),
        };
        let commit = object
            .peel_to_commit()
            .map_err(|_| Error::UnknownRevision {
                name: name.to_owned(),
            })?;
        Ok(commit_to_revision(&commit, Some(name.to_owned())))
    }

    fn list_changed_paths(&self, old: &Revision, new: &Revision) -> Result<BTreeSet<String>> {
        let diff = match (self.tree(old)?, self.tree(new)?) {
            (Some(old_tree), Some(new_tree)) => {
                self.inner
                    .diff_tree_to_tree(Some(&old_tree), Some(&new_tree), None)?
            }
            (Some(tree), None) | (None, Some(tree)) => self.workdir_diff(&tree)?,
            (None, None) => return Ok(BTreeSet::new()),
        };

        let mut paths = BTreeSet::new();
        for delta in diff.deltas() {
            if delta.status() == Delta::Unmodified {
                continue;
            }
            for file in [delta.old_file(), delta.new_file()] {
                if let Some(path) = file.path() {
                    paths.insert(slash_path(path));
                }
            }
        }
        Ok(paths)
    }

    fn read_blob(&self, revision: &Revision, path: &str) -> Result<Option<Vec<u8>>> {
        let Some(tree) = self.tree(revision)? else {
            return self.read_working_file(path);
        };

        let entry = match tree.get_path(Path::new(path)) {
            Ok(entry) => entry,
            Err(err) if err.code() == ErrorCode::NotFound => return Ok(None),
            Err(err) => return Err(Error::from(err)),
        };
        if entry.kind() != Some(ObjectType::Blob) {
            return Ok(None);
        }
        let blob = entry.to_object(&self.inner)?.peel_to_blob()?;
        Ok(Some(blob.content().to_vec()))
    }

    fn touching_commits(&self, paths: &[String], limit: usize) -> Result<Vec<Revision>> {
        if paths.is_empty() || limit == 0 || self.head_revision()?.is_none() {
            return Ok(Vec::new());
        }

        let mut walk = self.inner.revwalk()?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
        walk.simplify_first_parent()?;
        walk.push_head()?;

        let mut found = Vec::new();
        for oid in walk {
            let commit = self.inner.find_commit(oid?)?;
            let tree = commit.tree()?;
            let parent_tree = if commit.parent_count() == 0 {
                None
            } else {
                Some(commit.parent(0)?.tree()?)
            };

            let mut opts = DiffOptions::new();
            opts.disable_pathspec_match(true);
            for path in paths {
                opts.pathspec(path);
            }
            let diff =
                self.inner
                    .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut opts))?;
            if diff.deltas().len() > 0 {
                found.push(commit_to_revision(&commit, None));
                if found.len() == limit {
                    break;
                }
            }
        }
        Ok(found)
    }

    fn first_parent(&self, revision: &Revision) -> Result<Option<Revision>> {
        match &revision.id {
            RevisionId::WorkingTree => self.head_revision(),
            RevisionId::Commit(oid) => {
                let commit = self.commit(oid)?;
                if commit.parent_count() == 0 {
                    return Ok(None);
                }
                Ok(Some(commit_to_revision(&commit.parent(0)?, None)))
            }
        }
    }
}

fn commit_to_revision(commit: &git2::Commit<'_>, reference: Option<String>) -> Revision {
    Revision {
        id: RevisionId::Commit(commit.id().to_string()),
        reference,
        summary: commit.summary().map(str::to_owned),
        timestamp: Some(commit.time().seconds()),
    }
}

/// Canonicalize a path that may not exist by canonicalizing its parent.
pub(crate) fn canonicalize_lenient(path: &Path) -> Result<PathBuf> {
    match std::fs::canonicalize(path) {
        Ok(canonical) => Ok(canonical),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let parent = path
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| Error::invalid_input(format!("{} has no file name", path.display())))?;
            let parent = std::fs::canonicalize(parent).map_err(|source| Error::io(parent, source))?;
            Ok(parent.join(name))
        }
        Err(source) => Err(Error::io(path, source)),
    }
}

pub(crate) fn relative_to(root: &Path, path: &Path) -> Result<String> {
    let canonical = canonicalize_lenient(path)?;
    let relative = canonical.strip_prefix(root).map_err(|_| {
        Error::invalid_input(format!(
            "{} is outside the repository at {}",
            canonical.display(),
            root.display()
        ))
    })?;
    Ok(slash_path(relative))
}

/// Join a repository-relative directory and a relative path, folding `.` and
/// `..` components.
pub(crate) fn join_relative(dir: &str, path: &str) -> Option<String> {
    let mut parts: Vec<&str> = dir.split('/').filter(|part| !part.is_empty()).collect();
    for part in path.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}

fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn display_path(path: &Path) -> String {
    path.to_path_buf()
        .into_os_string()
        .to_string_lossy()
        .into_owned()
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}
