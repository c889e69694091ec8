//! Post-push workspace refresh notifications.
//!
//! After an accepted push the gateway tells the workspace-sync collaborator
//! to refresh.  Delivery is fire-and-forget: the git client never waits for
//! it and a failure is only logged.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::NotifyConfig;
use crate::metrics::Metrics;

#[async_trait::async_trait]
pub trait WorkspaceNotifier: Send + Sync {
    async fn repository_pushed(&self, repo_id: &str) -> Result<()>;
}

#[derive(Serialize)]
struct PushNotification<'a> {
    repo_id: &'a str,
}

pub struct HttpWorkspaceNotifier {
    url: String,
    http: reqwest::Client,
    timeout: Duration,
}

impl HttpWorkspaceNotifier {
    pub fn new(url: impl Into<String>, http: reqwest::Client, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            http,
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl WorkspaceNotifier for HttpWorkspaceNotifier {
    async fn repository_pushed(&self, repo_id: &str) -> Result<()> {
        let resp = self
            .http
            .post(&self.url)
            .timeout(self.timeout)
            .json(&PushNotification { repo_id })
            .send()
            .await
            .with_context(|| format!("POST {} failed", self.url))?;
        let status = resp.status();
        anyhow::ensure!(status.is_success(), "POST {} returned {status}", self.url);
        Ok(())
    }
}

/// Used when no workspace URL is configured.
pub struct NoopNotifier;

#[async_trait::async_trait]
impl WorkspaceNotifier for NoopNotifier {
    async fn repository_pushed(&self, _repo_id: &str) -> Result<()> {
        Ok(())
    }
}

pub fn build_notifier(config: &NotifyConfig, http: reqwest::Client) -> Arc<dyn WorkspaceNotifier> {
    match &config.workspace_url {
        Some(url) => Arc::new(HttpWorkspaceNotifier::new(
            url.clone(),
            http,
            Duration::from_secs(config.timeout_secs),
        )),
        None => Arc::new(NoopNotifier),
    }
}

/// Schedule a notification for `repo_id` after `delay`.  Not awaited and
/// never cancelled.
pub fn spawn_push_notification(
    notifier: Arc<dyn WorkspaceNotifier>,
    metrics: Arc<Metrics>,
    repo_id: String,
    delay: Duration,
) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        match notifier.repository_pushed(&repo_id).await {
            Ok(()) => debug!(%repo_id, "workspace notified"),
            Err(e) => {
                metrics.notifications_failed_total.inc();
                warn!(%repo_id, error = %format!("{e:#}"), "workspace notification failed");
            }
        }
    });
}
