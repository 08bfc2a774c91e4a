//! Git operations using a hybrid CLI + libgit2 approach.
//!
//! **CLI (with hardening) for operations that talk to the remote or need flags
//! libgit2 does not expose:**
//! - `clone_bare` - needs `--depth=1` and `GIT_SSH_COMMAND` identity support
//! - `fetch` - same, for incremental updates of the mirror
//! - `create_worktree` - needs `--detach`
//! - `prune_worktrees` - housekeeping after generations are deleted
//!
//! **libgit2 for local reads:**
//! - `open_repository` - clean API for opening existing repos
//! - `resolve_default_branch` / `resolve_branch_commit` - ref/commit reading

use git2::Repository;
use std::path::Path;
use std::process::{Command, Stdio};
use thiserror::Error;

use crate::credentials::AuthHandle;

/// Errors returned by git operations.
#[derive(Error, Debug)]
pub enum GitError {
    /// libgit2 reported an error.
    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
    /// Repository path does not contain a git repo.
    #[error("repository not found at {0}")]
    NotFound(String),
    /// Output parsing or unexpected git data.
    #[error("failed to parse git data: {0}")]
    ParseError(String),
    /// Worktree creation failed.
    #[error("worktree creation failed: {0}")]
    WorktreeError(String),
    /// Clone failed.
    #[error("clone failed: {0}")]
    CloneError(String),
    /// Fetch failed.
    #[error("fetch failed: {0}")]
    FetchError(String),
    /// Underlying IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Invalid inputs were provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Validate that a git ref (branch name or commit SHA) does not contain dangerous patterns.
///
/// Rejects:
/// - Empty strings
/// - Strings containing `..` (path traversal)
/// - Strings starting with `-` (could be interpreted as flags)
/// - Strings containing null bytes or control characters
fn validate_git_ref(value: &str, name: &str) -> Result<(), GitError> {
    if value.is_empty() {
        return Err(GitError::InvalidInput(format!("{} cannot be empty", name)));
    }
    if value.contains("..") {
        return Err(GitError::InvalidInput(format!(
            "{} cannot contain '..'",
            name
        )));
    }
    if value.starts_with('-') {
        return Err(GitError::InvalidInput(format!(
            "{} cannot start with '-'",
            name
        )));
    }
    if value.bytes().any(|b| b < 0x20) {
        return Err(GitError::InvalidInput(format!(
            "{} cannot contain null or control characters",
            name
        )));
    }
    Ok(())
}

/// Validate a remote URL before handing it to the git CLI.
///
/// The URL itself is left for git to judge; only values that could be
/// mistaken for options or that smuggle control characters are rejected.
fn validate_url(url: &str) -> Result<(), GitError> {
    if url.is_empty() {
        return Err(GitError::InvalidInput("url cannot be empty".to_string()));
    }
    if url.starts_with('-') {
        return Err(GitError::InvalidInput(
            "url cannot start with '-'".to_string(),
        ));
    }
    if url.bytes().any(|b| b < 0x20) {
        return Err(GitError::InvalidInput(
            "url cannot contain null or control characters".to_string(),
        ));
    }
    Ok(())
}

fn path_str<'a>(path: &'a Path, what: &str) -> Result<&'a str, GitError> {
    path.to_str()
        .ok_or_else(|| GitError::ParseError(format!("{} path is not valid UTF-8", what)))
}

/// Git CLI wrapper with security hardening.
pub struct GitCli {
    git_path: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    /// Create a new GitCli instance using the system git.
    pub fn new() -> Self {
        Self {
            git_path: "git".into(),
        }
    }

    /// Create a hardened Command with security settings.
    ///
    /// Applies:
    /// - `GIT_LFS_SKIP_SMUDGE=1` - skip LFS file downloads
    /// - `GIT_TERMINAL_PROMPT=0` - disable interactive prompts
    /// - `core.hooksPath=` - disable hooks execution
    /// - `GIT_SSH_COMMAND` - pin the resolved identity when the handle carries one
    fn command(&self, auth: Option<&AuthHandle>) -> Command {
        let mut cmd = Command::new(&self.git_path);
        cmd.env("GIT_LFS_SKIP_SMUDGE", "1");
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        if let Some(ssh_command) = auth.and_then(AuthHandle::ssh_command) {
            cmd.env("GIT_SSH_COMMAND", ssh_command);
        }
        cmd.args(["-c", "core.hooksPath="]);
        cmd.stdin(Stdio::null());
        cmd
    }

    /// Check whether the git binary can be executed.
    pub fn is_available(&self) -> bool {
        Command::new(&self.git_path)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Clone a remote as a bare repository.
    ///
    /// With `shallow`, only the latest commit is transferred (`--depth=1`).
    /// A destination created by a failed clone is removed again.
    pub fn clone_bare(
        &self,
        url: &str,
        dest: &Path,
        auth: &AuthHandle,
        shallow: bool,
    ) -> Result<(), GitError> {
        validate_url(url)?;

        let dest_existed = dest.exists();

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let dest_str = path_str(dest, "destination")?;

        let mut cmd = self.command(Some(auth));
        cmd.args(["clone", "--bare", "--quiet"]);
        if shallow {
            cmd.arg("--depth=1");
        }
        let output = cmd.arg("--").arg(url).arg(dest_str).output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !dest_existed {
                let _ = std::fs::remove_dir_all(dest);
            }
            return Err(GitError::CloneError(stderr.trim().to_string()));
        }

        Ok(())
    }

    /// Fetch a single branch from `url` into the mirror, force-updating the local ref.
    pub fn fetch(
        &self,
        mirror_path: &Path,
        url: &str,
        branch: &str,
        auth: &AuthHandle,
        shallow: bool,
    ) -> Result<(), GitError> {
        validate_url(url)?;
        validate_git_ref(branch, "branch")?;

        let mirror_str = path_str(mirror_path, "mirror")?;
        let refspec = format!("+refs/heads/{0}:refs/heads/{0}", branch);

        let mut cmd = self.command(Some(auth));
        cmd.arg("-C").arg(mirror_str).args(["fetch", "--quiet"]);
        if shallow {
            cmd.arg("--depth=1");
        }
        let output = cmd.arg("--").arg(url).arg(&refspec).output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GitError::FetchError(stderr.trim().to_string()));
        }

        Ok(())
    }

    /// Create a detached worktree from a bare repository at a specific commit.
    ///
    /// Committed symlinks are checked out as plain files holding the link
    /// target, so nothing in the tree points outside it.
    pub fn create_worktree(
        &self,
        mirror_path: &Path,
        worktree_path: &Path,
        commit: &str,
    ) -> Result<(), GitError> {
        validate_git_ref(commit, "commit")?;

        if let Some(parent) = worktree_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mirror_str = path_str(mirror_path, "mirror")?;
        let worktree_str = path_str(worktree_path, "worktree")?;

        let output = self
            .command(None)
            .args(["-c", "core.symlinks=false"])
            .arg("-C")
            .arg(mirror_str)
            .args(["worktree", "add", "--quiet", "--detach"])
            .arg(worktree_str)
            .arg(commit)
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GitError::WorktreeError(stderr.trim().to_string()));
        }

        Ok(())
    }

    /// Drop worktree bookkeeping for directories that no longer exist.
    pub fn prune_worktrees(&self, mirror_path: &Path) -> Result<(), GitError> {
        let mirror_str = path_str(mirror_path, "mirror")?;

        let output = self
            .command(None)
            .arg("-C")
            .arg(mirror_str)
            .args(["worktree", "prune"])
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GitError::WorktreeError(stderr.trim().to_string()));
        }

        Ok(())
    }
}

/// Open an existing repository at the given path.
pub fn open_repository(path: &Path) -> Result<Repository, GitError> {
    let repo = Repository::open(path).map_err(|e| {
        if e.code() == git2::ErrorCode::NotFound {
            GitError::NotFound(path.display().to_string())
        } else {
            GitError::Git(e)
        }
    })?;
    Ok(repo)
}

/// Resolve the default branch name and HEAD commit from a repository.
///
/// Returns (branch_name, commit_sha) e.g. ("main", "abc123...")
pub fn resolve_default_branch(repo: &Repository) -> Result<(String, String), GitError> {
    let head = repo.head()?;
    let ref_name = head
        .name()
        .ok_or_else(|| GitError::ParseError("HEAD reference has no name".to_string()))?;

    let branch_name = ref_name
        .strip_prefix("refs/heads/")
        .ok_or_else(|| {
            GitError::ParseError(format!(
                "unexpected HEAD format: expected 'refs/heads/<branch>', got '{}'",
                ref_name
            ))
        })?
        .to_string();

    let commit = head.peel_to_commit()?;
    let commit_sha = commit.id().to_string();

    Ok((branch_name, commit_sha))
}

/// Resolve the commit a local branch points at.
pub fn resolve_branch_commit(repo: &Repository, branch: &str) -> Result<String, GitError> {
    validate_git_ref(branch, "branch")?;
    let reference = repo.find_reference(&format!("refs/heads/{}", branch))?;
    let commit = reference.peel_to_commit()?;
    Ok(commit.id().to_string())
}
