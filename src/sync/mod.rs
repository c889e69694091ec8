//! Bidirectional GitHub sync for bare repositories.

pub mod engine;
pub mod lifecycle;
pub mod locks;
pub mod scheduler;
pub mod status;

use std::path::Path;

use tracing::debug;

pub use engine::{SyncEngine, SyncOutcome};
pub use lifecycle::{ConnectRequest, RemoteLifecycle};
pub use locks::RepoLocks;
pub use scheduler::AutoSyncScheduler;
pub use status::{StatusResolver, SyncState, SyncStatus};

use crate::git::Git;

/// Branch `HEAD` points at, or `fallback` when it cannot be resolved.
pub(crate) async fn resolve_branch(git: &Git, repo: &Path, fallback: &str) -> String {
    match git.head_branch(repo).await {
        Ok(branch) => branch,
        Err(e) => {
            debug!(repo = %repo.display(), error = %e, %fallback, "HEAD unresolved; using fallback branch");
            fallback.to_string()
        }
    }
}
