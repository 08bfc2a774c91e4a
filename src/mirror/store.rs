//! The published mirror and its refresh cycle.
//!
//! `MirrorStore` owns the storage directory. Every revision it publishes lives
//! in its own generation directory that is never modified after it is built;
//! publishing swaps the in-memory [`Snapshot`] handle (and the `current`
//! symlink on disk). Request handlers clone the handle once and read through
//! it, so a swap in the middle of a response is invisible to that response.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::SystemTime;

use thiserror::Error;

use super::git::GitError;
use super::lock::MirrorLock;
use super::paths::MirrorLayout;
use super::remote::{ConnectionParameters, Remote};
use super::swap::replace_symlink;
use crate::types::{GenerationId, Revision};

/// Fatal errors while setting up the mirror.
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Another process holds the storage lock.
    #[error("storage directory {0} is in use by another gitserve process")]
    Locked(PathBuf),
    /// The storage directory could not be prepared.
    #[error("failed to prepare storage directory: {0}")]
    Io(#[from] io::Error),
    /// The initial clone failed.
    #[error("initial clone failed: {0}")]
    Clone(#[from] GitError),
}

/// Broad cause of a failed refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncErrorKind {
    Network,
    Auth,
    MissingRef,
    Io,
    Other,
}

impl SyncErrorKind {
    /// Guess the cause from git's stderr.
    pub fn classify(message: &str) -> Self {
        const AUTH: &[&str] = &[
            "permission denied",
            "authentication failed",
            "could not read username",
            "invalid username or password",
            "host key verification failed",
        ];
        const MISSING_REF: &[&str] = &["couldn't find remote ref", "not found in upstream"];
        const NETWORK: &[&str] = &[
            "could not resolve host",
            "connection timed out",
            "connection refused",
            "network is unreachable",
            "unable to access",
            "early eof",
            "remote end hung up",
            "operation timed out",
            "could not read from remote repository",
        ];

        let message = message.to_ascii_lowercase();
        let matches = |needles: &[&str]| needles.iter().any(|n| message.contains(n));

        // Auth failures over ssh also print "could not read from remote
        // repository", so they are checked first.
        if matches(AUTH) {
            Self::Auth
        } else if matches(MISSING_REF) {
            Self::MissingRef
        } else if matches(NETWORK) {
            Self::Network
        } else {
            Self::Other
        }
    }
}

impl fmt::Display for SyncErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Network => "network",
            Self::Auth => "auth",
            Self::MissingRef => "missing ref",
            Self::Io => "io",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// A refresh that failed. The published tree is unaffected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct SyncError {
    pub kind: SyncErrorKind,
    pub message: String,
}

impl SyncError {
    pub fn new(kind: SyncErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<GitError> for SyncError {
    fn from(err: GitError) -> Self {
        let kind = match &err {
            GitError::CloneError(stderr)
            | GitError::FetchError(stderr)
            | GitError::WorktreeError(stderr) => SyncErrorKind::classify(stderr),
            GitError::Io(_) => SyncErrorKind::Io,
            GitError::Git(e) if e.code() == git2::ErrorCode::NotFound => SyncErrorKind::MissingRef,
            _ => SyncErrorKind::Other,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<io::Error> for SyncError {
    fn from(err: io::Error) -> Self {
        Self::new(SyncErrorKind::Io, err.to_string())
    }
}

/// One complete, immutable tree.
#[derive(Debug)]
pub struct Snapshot {
    generation: GenerationId,
    revision: Revision,
    path: PathBuf,
}

impl Snapshot {
    pub fn generation(&self) -> GenerationId {
        self.generation
    }

    pub fn revision(&self) -> &Revision {
        &self.revision
    }

    /// Directory holding the tree's files.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Result of one [`MirrorStore::resynchronize`] call.
#[derive(Debug)]
pub enum RefreshOutcome {
    /// The remote has no new commit.
    NoChange,
    /// A new tree was published.
    Updated(Arc<Snapshot>),
    /// Nothing was published.
    Failed(SyncError),
}

/// How the most recent sync attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Success,
    Failed(SyncError),
}

#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub outcome: SyncOutcome,
    pub at: SystemTime,
}

impl SyncStatus {
    fn now(outcome: SyncOutcome) -> Self {
        Self {
            outcome,
            at: SystemTime::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.outcome == SyncOutcome::Success
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("Mirror mutex poisoned; continuing with inner state");
            poisoned.into_inner()
        }
    }
}

fn remove_generation(path: &Path) {
    match std::fs::remove_dir_all(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to remove {}: {}", path.display(), e),
    }
}

/// Remove what an earlier run left behind. Entries the layout does not own
/// are left alone.
fn clear_stale(layout: &MirrorLayout) -> io::Result<()> {
    for entry in std::fs::read_dir(layout.root())? {
        let entry = entry?;
        let path = entry.path();
        if !layout.owns(&entry.file_name()) {
            if path != layout.lock_path() {
                log::debug!("Leaving unrelated {}", path.display());
            }
            continue;
        }
        log::debug!("Removing stale {}", path.display());
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Link target for `current`, relative to the storage root.
fn current_link_target(generation: GenerationId) -> PathBuf {
    Path::new("generations").join(generation.dir_name())
}

/// The mirror, as shared by the refresh scheduler and the file server.
pub struct MirrorStore {
    layout: MirrorLayout,
    remote: Box<dyn Remote>,
    params: ConnectionParameters,
    current: RwLock<Arc<Snapshot>>,
    /// Replaced snapshots waiting for their last reader.
    retired: Mutex<Vec<Arc<Snapshot>>>,
    status: Mutex<SyncStatus>,
    /// Serializes refreshes; holds the last generation number handed out.
    refresh: Mutex<GenerationId>,
    _lock: MirrorLock,
}

impl MirrorStore {
    /// Take ownership of the storage directory and publish the first tree.
    ///
    /// Mirror state left in the directory by an earlier run is removed first.
    pub fn initialize(
        layout: MirrorLayout,
        remote: Box<dyn Remote>,
        params: ConnectionParameters,
    ) -> Result<Self, MirrorError> {
        std::fs::create_dir_all(layout.root())?;
        let storage_lock = MirrorLock::try_acquire(&layout.lock_path())?
            .ok_or_else(|| MirrorError::Locked(layout.root().to_path_buf()))?;

        clear_stale(&layout)?;
        std::fs::create_dir_all(layout.generations_dir())?;

        let generation = GenerationId::new(1);
        let path = layout.generation_dir(generation);
        let revision = remote.clone_into(&path, &params).inspect_err(|_| {
            remove_generation(&path);
        })?;
        replace_symlink(&layout.current_symlink(), &current_link_target(generation))?;

        log::info!(
            "Mirror ready at {} ({}, generation {})",
            layout.root().display(),
            revision,
            generation
        );

        let snapshot = Arc::new(Snapshot {
            generation,
            revision,
            path,
        });

        Ok(Self {
            layout,
            remote,
            params,
            current: RwLock::new(snapshot),
            retired: Mutex::new(Vec::new()),
            status: Mutex::new(SyncStatus::now(SyncOutcome::Success)),
            refresh: Mutex::new(generation),
            _lock: storage_lock,
        })
    }

    /// The published tree. Always complete.
    pub fn current_root(&self) -> Arc<Snapshot> {
        match self.current.read() {
            Ok(current) => Arc::clone(&current),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn current_revision(&self) -> Revision {
        self.current_root().revision().clone()
    }

    /// Outcome of the most recent sync attempt.
    pub fn status(&self) -> SyncStatus {
        lock(&self.status).clone()
    }

    pub fn layout(&self) -> &MirrorLayout {
        &self.layout
    }

    /// Fetch the remote and publish a new tree if it moved.
    ///
    /// On failure the published tree is untouched and whatever was built
    /// for the new generation is removed.
    pub fn resynchronize(&self) -> RefreshOutcome {
        let mut last = lock(&self.refresh);
        let current = self.current_root();
        let generation = last.next();
        let path = self.layout.generation_dir(generation);

        let outcome = match self
            .remote
            .fetch_and_update(current.revision(), &path, &self.params)
        {
            Ok(None) => {
                remove_generation(&path);
                RefreshOutcome::NoChange
            }
            Ok(Some(revision)) => {
                *last = generation;
                let snapshot = Arc::new(Snapshot {
                    generation,
                    revision,
                    path,
                });
                match self.publish(Arc::clone(&snapshot)) {
                    Ok(()) => RefreshOutcome::Updated(snapshot),
                    Err(e) => {
                        remove_generation(snapshot.path());
                        RefreshOutcome::Failed(e.into())
                    }
                }
            }
            Err(e) => {
                // Never reuse a number git may have registered a worktree for.
                *last = generation;
                remove_generation(&path);
                RefreshOutcome::Failed(e.into())
            }
        };

        let status = match &outcome {
            RefreshOutcome::Failed(e) => SyncOutcome::Failed(e.clone()),
            _ => SyncOutcome::Success,
        };
        *lock(&self.status) = SyncStatus::now(status);

        outcome
    }

    fn publish(&self, snapshot: Arc<Snapshot>) -> io::Result<()> {
        replace_symlink(
            &self.layout.current_symlink(),
            &current_link_target(snapshot.generation),
        )?;

        let previous = {
            let mut current = match self.current.write() {
                Ok(current) => current,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::replace(&mut *current, snapshot)
        };
        lock(&self.retired).push(previous);
        Ok(())
    }

    /// Delete retired generations that no reader holds any more.
    ///
    /// Returns how many were removed.
    pub fn collect_garbage(&self) -> usize {
        let _refresh = lock(&self.refresh);

        let unreferenced: Vec<Arc<Snapshot>> = {
            let mut retired = lock(&self.retired);
            let (free, held): (Vec<_>, Vec<_>) = retired
                .drain(..)
                .partition(|snapshot| Arc::strong_count(snapshot) == 1);
            *retired = held;
            free
        };

        if unreferenced.is_empty() {
            return 0;
        }

        for snapshot in &unreferenced {
            log::debug!("Removing generation {}", snapshot.generation);
            remove_generation(snapshot.path());
        }
        if let Err(e) = self.remote.prune() {
            log::warn!("Failed to prune mirror: {}", e);
        }

        log::info!("Removed {} retired generation(s)", unreferenced.len());
        unreferenced.len()
    }
}
