//! Local mirror of the remote repository

mod git;
mod lock;
mod paths;
mod remote;
mod store;
mod swap;

pub use git::GitError;
pub use paths::MirrorLayout;
pub use remote::{ConnectionParameters, GitRemote, Remote};
pub use store::{
    MirrorError, MirrorStore, RefreshOutcome, Snapshot, SyncError, SyncErrorKind, SyncOutcome,
    SyncStatus,
};

#[cfg(test)]
pub(crate) use git::test_support::{Upstream, require_git};
#[cfg(test)]
pub(crate) use store::test_support;
