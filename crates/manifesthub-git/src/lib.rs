// SPDX-License-Identifier: MIT OR Apache-2.0
//! Git-backed content-addressable store for ManifestHub.
//!
//! [`GitStore`] owns a single `libgit2` repository and implements both
//! collaborators the orchestrator talks to: the account vault (one branch
//! per account, named by its branch index) and the manifest archive (one
//! branch per app, tags pinning every `(app, depot, manifest)` triple ever
//! seen). Writes to different branches may run concurrently; writes to the
//! same branch are serialized through a per-branch lock (see
//! [`GitStore::branch_lock`]).
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod archive;
mod vault;
mod vdf;

pub use archive::{TrackingReport, WriteOutcome};
pub use vault::AccountLoadError;

use git2::{Cred, RemoteCallbacks, Repository};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex as TokioMutex;

/// Errors raised by vault or archive operations.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// A `libgit2` call failed.
    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),

    /// The blocking git task panicked or was cancelled.
    #[error("git task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// An account record failed to encrypt, decrypt, or (de)serialize.
    #[error("account record error: {0}")]
    Account(#[from] AccountLoadError),
}

/// Identity used for ManifestHub's own commits.
pub(crate) const COMMITTER_NAME: &str = "ManifestHub";
pub(crate) const COMMITTER_EMAIL: &str = "manifesthub@localhost";

/// A handle onto a bare (or bare-equivalent) local git repository plus its
/// `origin` remote, shared across the account vault and manifest archive.
pub struct GitStore {
    repo: Arc<StdMutex<Repository>>,
    branch_locks: StdMutex<HashMap<String, Arc<TokioMutex<()>>>>,
    push_token: String,
}

impl GitStore {
    /// Opens (or initializes) a bare repository at `path` and points its
    /// `origin` remote at `remote_url` if it isn't already configured.
    /// `remote_url` may be omitted when `path` is an existing checkout whose
    /// `origin` is already set up (the common case when ManifestHub runs
    /// inside a CI job that already cloned the archive). `push_token` is
    /// used as the password half of the `x-access-token` credential for
    /// every push.
    pub fn open(path: &Path, remote_url: Option<&str>, push_token: String) -> Result<Self, ArchiveError> {
        let repo = match Repository::open_bare(path) {
            Ok(repo) => repo,
            Err(_) => Repository::init_bare(path)?,
        };
        if repo.find_remote("origin").is_err() {
            let url = remote_url.expect("origin remote must be configured when none exists yet");
            repo.remote("origin", url)?;
        }
        Ok(Self {
            repo: Arc::new(StdMutex::new(repo)),
            branch_locks: StdMutex::new(HashMap::new()),
            push_token,
        })
    }

    /// Returns the lock guarding writes to `branch`, creating it on first
    /// use. The lock map itself is guarded by a plain `std::sync::Mutex`
    /// that is never held across an `.await`.
    fn branch_lock(&self, branch: &str) -> Arc<TokioMutex<()>> {
        let mut locks = self.branch_locks.lock().expect("branch lock map poisoned");
        locks
            .entry(branch.to_string())
            .or_insert_with(|| Arc::new(TokioMutex::new(())))
            .clone()
    }

}

fn push_credentials(push_token: &str) -> RemoteCallbacks<'static> {
    let mut callbacks = RemoteCallbacks::new();
    let token = push_token.to_string();
    callbacks.credentials(move |_url, _username, _allowed| {
        Cred::userpass_plaintext("x-access-token", &token)
    });
    callbacks
}

/// Pushes `refspec:refspec` (a fast-forward-or-create push) to `origin`.
pub(crate) fn push_ref(
    repo: &Repository,
    push_token: &str,
    refspec: &str,
) -> Result<(), git2::Error> {
    let mut remote = repo.find_remote("origin")?;
    let mut push_options = git2::PushOptions::new();
    push_options.remote_callbacks(push_credentials(push_token));
    let spec = format!("{refspec}:{refspec}");
    remote.push(&[spec.as_str()], Some(&mut push_options))
}

/// Force-pushes a deletion of `refspec` (`+:refspec`) to `origin`.
pub(crate) fn push_delete_ref(
    repo: &Repository,
    push_token: &str,
    refspec: &str,
) -> Result<(), git2::Error> {
    let mut remote = repo.find_remote("origin")?;
    let mut push_options = git2::PushOptions::new();
    push_options.remote_callbacks(push_credentials(push_token));
    let spec = format!("+:{refspec}");
    remote.push(&[spec.as_str()], Some(&mut push_options))
}
