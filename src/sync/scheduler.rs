//! Periodic sync of every repository that opted into auto-sync.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::engine::SyncEngine;
use crate::credentials::CredentialResolver;
use crate::registry::RepositoryRegistry;

pub struct AutoSyncScheduler {
    engine: Arc<SyncEngine>,
    registry: Arc<dyn RepositoryRegistry>,
    credentials: CredentialResolver,
    interval: Duration,
}

impl AutoSyncScheduler {
    pub fn new(
        engine: Arc<SyncEngine>,
        registry: Arc<dyn RepositoryRegistry>,
        credentials: CredentialResolver,
        interval: Duration,
    ) -> Self {
        Self {
            engine,
            registry,
            credentials,
            interval,
        }
    }

    /// Tick until `shutdown` fires.  The first pass runs one interval after
    /// startup.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        info!(interval_secs = self.interval.as_secs(), "auto-sync scheduler started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let synced = self.run_once().await;
                    debug!(synced, "auto-sync pass finished");
                }
            }
        }
        info!("auto-sync scheduler stopped");
    }

    /// One pass over the registry.  Returns how many repositories were
    /// synced without error.
    pub async fn run_once(&self) -> usize {
        let repos = match self.registry.list().await {
            Ok(repos) => repos,
            Err(e) => {
                warn!(error = %e, "auto-sync could not list repositories");
                return 0;
            }
        };

        let mut synced = 0;
        for repo in repos.iter().filter(|r| r.auto_sync && r.remote_configured) {
            let credential = match self.credentials.resolve(&repo.id, None).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(repo_id = %repo.id, error = %e, "auto-sync credential lookup failed");
                    continue;
                }
            };
            match self
                .engine
                .sync_with_remote(&repo.id, credential.as_ref())
                .await
            {
                Ok(outcome) if outcome.is_success() => synced += 1,
                Ok(_) => {}
                Err(e) => warn!(repo_id = %repo.id, error = %e, "auto-sync failed"),
            }
        }
        synced
    }
}
