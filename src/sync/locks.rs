//! Per-repository mutual exclusion.
//!
//! Remote configuration, fetch and push for one repository mutate the same
//! refs and `config` file, so they run one at a time per repository ID.
//! Different repositories never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

#[derive(Default, Clone)]
pub struct RepoLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl RepoLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `repo_id`.  The guard releases on drop.
    pub async fn acquire(&self, repo_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            // Entries only the map holds belong to no in-flight operation.
            map.retain(|_, m| Arc::strong_count(m) > 1);
            map.entry(repo_id.to_string()).or_default().clone()
        };
        trace!(%repo_id, "waiting for repository lock");
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.inner.lock().map(|m| m.len()).unwrap_or_default()
    }
}
