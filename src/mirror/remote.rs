//! The version-control side of the mirror.
//!
//! [`Remote`] is what the store asks for trees: one full checkout at startup,
//! then "give me a new tree if anything changed" on every refresh. The store
//! owns generation numbering and publication; the remote only fills the
//! directories it is handed.

use std::path::{Path, PathBuf};

use super::git::{GitCli, GitError, open_repository, resolve_branch_commit, resolve_default_branch};
use crate::credentials::AuthHandle;
use crate::types::Revision;

/// Where to fetch from and how to authenticate. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ConnectionParameters {
    pub url: String,
    pub auth: AuthHandle,
}

impl ConnectionParameters {
    pub fn new(url: impl Into<String>, auth: AuthHandle) -> Self {
        Self {
            url: url.into(),
            auth,
        }
    }
}

/// Source of materialized trees.
pub trait Remote: Send + Sync {
    /// Fetch the remote from scratch and write its default branch to `dest`.
    fn clone_into(&self, dest: &Path, params: &ConnectionParameters)
    -> Result<Revision, GitError>;

    /// Fetch the branch of `current`.
    ///
    /// Returns `None` without touching `dest` when the branch has not moved,
    /// otherwise writes the new tree to `dest`.
    fn fetch_and_update(
        &self,
        current: &Revision,
        dest: &Path,
        params: &ConnectionParameters,
    ) -> Result<Option<Revision>, GitError>;

    /// Housekeeping after generations have been deleted.
    fn prune(&self) -> Result<(), GitError> {
        Ok(())
    }
}

/// [`Remote`] backed by a bare mirror and detached worktrees.
pub struct GitRemote {
    git: GitCli,
    mirror: PathBuf,
    shallow: bool,
}

impl GitRemote {
    pub fn new(mirror: impl Into<PathBuf>, shallow: bool) -> Self {
        Self {
            git: GitCli::new(),
            mirror: mirror.into(),
            shallow,
        }
    }

    pub fn mirror_path(&self) -> &Path {
        &self.mirror
    }

    /// Check out `commit` into `dest` and drop the `.git` link so only
    /// working-tree files remain.
    fn materialize(&self, dest: &Path, commit: &str) -> Result<(), GitError> {
        self.git.create_worktree(&self.mirror, dest, commit)?;
        match std::fs::remove_file(dest.join(".git")) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GitError::Io(e)),
        }
    }
}

impl Remote for GitRemote {
    fn clone_into(
        &self,
        dest: &Path,
        params: &ConnectionParameters,
    ) -> Result<Revision, GitError> {
        log::info!("Cloning {}", params.url);
        self.git
            .clone_bare(&params.url, &self.mirror, &params.auth, self.shallow)?;

        let repo = open_repository(&self.mirror)?;
        let (branch, commit) = resolve_default_branch(&repo)?;
        self.materialize(dest, &commit)?;

        Ok(Revision::new(commit, branch))
    }

    fn fetch_and_update(
        &self,
        current: &Revision,
        dest: &Path,
        params: &ConnectionParameters,
    ) -> Result<Option<Revision>, GitError> {
        self.git.fetch(
            &self.mirror,
            &params.url,
            &current.branch,
            &params.auth,
            self.shallow,
        )?;

        let repo = open_repository(&self.mirror)?;
        let commit = resolve_branch_commit(&repo, &current.branch)?;
        if commit == current.commit {
            return Ok(None);
        }

        self.materialize(dest, &commit)?;
        Ok(Some(Revision::new(commit, current.branch.clone())))
    }

    fn prune(&self) -> Result<(), GitError> {
        self.git.prune_worktrees(&self.mirror)
    }
}
