//! Read-only divergence between a local branch and its GitHub tracking ref.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use super::resolve_branch;
use crate::config::SyncConfig;
use crate::error::CoreError;
use crate::git::{BareRepos, Git, GitError};
use crate::metrics::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncState {
    Synced,
    Ahead,
    Behind,
    Diverged,
    NoRemote,
    Error,
}

impl SyncState {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncState::Synced => "synced",
            SyncState::Ahead => "ahead",
            SyncState::Behind => "behind",
            SyncState::Diverged => "diverged",
            SyncState::NoRemote => "no-remote",
            SyncState::Error => "error",
        }
    }
}

/// `(ahead, behind, status)` for one repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub ahead: u64,
    pub behind: u64,
    pub status: SyncState,
}

impl SyncStatus {
    fn without_counts(status: SyncState) -> Self {
        Self {
            ahead: 0,
            behind: 0,
            status,
        }
    }

    pub fn from_counts(ahead: u64, behind: u64) -> Self {
        let status = match (ahead, behind) {
            (0, 0) => SyncState::Synced,
            (_, 0) => SyncState::Ahead,
            (0, _) => SyncState::Behind,
            _ => SyncState::Diverged,
        };
        Self {
            ahead,
            behind,
            status,
        }
    }
}

/// Computes [`SyncStatus`] with every git call bounded by the status
/// timeout.
#[derive(Clone)]
pub struct StatusResolver {
    git: Git,
    repos: BareRepos,
    remote_name: String,
    fallback_branch: String,
    metrics: Arc<Metrics>,
}

impl StatusResolver {
    pub fn new(git: Git, repos: BareRepos, config: &SyncConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            git,
            repos,
            remote_name: config.remote_name.clone(),
            fallback_branch: config.fallback_branch.clone(),
            metrics,
        }
    }

    /// Status of `repo_id`'s default branch.  Only a missing repository is
    /// an error; git failures and timeouts become [`SyncState::Error`].
    pub async fn status(&self, repo_id: &str) -> Result<SyncStatus, CoreError> {
        let path = self
            .repos
            .open(repo_id)
            .await
            .ok_or_else(|| CoreError::RepositoryNotFound(repo_id.to_string()))?;
        Ok(self.status_at(&path).await)
    }

    pub async fn status_at(&self, repo: &Path) -> SyncStatus {
        match self.compute(repo).await {
            Ok(status) => status,
            Err(e) => {
                if matches!(e, GitError::Timeout { .. }) {
                    self.metrics.git_timeouts_total.inc();
                }
                warn!(repo = %repo.display(), error = %e, "sync status unavailable");
                SyncStatus::without_counts(SyncState::Error)
            }
        }
    }

    async fn compute(&self, repo: &Path) -> Result<SyncStatus, GitError> {
        if self.git.remote_get_url(repo, &self.remote_name).await?.is_none() {
            return Ok(SyncStatus::without_counts(SyncState::NoRemote));
        }

        let branch = resolve_branch(&self.git, repo, &self.fallback_branch).await;
        let local = format!("refs/heads/{branch}");
        let tracking = format!("refs/remotes/{}/{branch}", self.remote_name);

        if self.git.resolve_ref(repo, &tracking).await?.is_none() {
            debug!(%tracking, "tracking ref absent");
            return Ok(SyncStatus::without_counts(SyncState::NoRemote));
        }

        if self.git.resolve_ref(repo, &local).await?.is_none() {
            let behind = self.git.count_commits(repo, &tracking).await?;
            return Ok(SyncStatus::from_counts(0, behind));
        }

        let (ahead, behind) = self.git.count_left_right(repo, &local, &tracking).await?;
        Ok(SyncStatus::from_counts(ahead, behind))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::SyncConfig;
    use crate::git::test_support::{commit_labeled, git, init_bare, rev};
    use crate::metrics::MetricsRegistry;

    fn resolver(root: &Path) -> StatusResolver {
        StatusResolver::new(
            git(),
            BareRepos::new(root),
            &SyncConfig::default(),
            MetricsRegistry::new().metrics,
        )
    }

    fn track(repo: &Path, oid: &str) {
        std::process::Command::new("git")
            .arg("-C")
            .arg(repo)
            .args(["update-ref", "refs/remotes/github/main", oid])
            .status()
            .unwrap();
    }

    #[test]
    fn derive_state_from_counts() {
        assert_eq!(SyncStatus::from_counts(0, 0).status, SyncState::Synced);
        assert_eq!(SyncStatus::from_counts(2, 0).status, SyncState::Ahead);
        assert_eq!(SyncStatus::from_counts(0, 5).status, SyncState::Behind);
        assert_eq!(SyncStatus::from_counts(1, 1).status, SyncState::Diverged);
    }

    #[test]
    fn serialises_kebab_case() {
        let json = serde_json::to_value(SyncStatus::without_counts(SyncState::NoRemote)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"ahead": 0, "behind": 0, "status": "no-remote"})
        );
    }

    #[tokio::test]
    async fn repo_without_remote_reports_no_remote() {
        let tmp = tempfile::tempdir().unwrap();
        init_bare(tmp.path(), "r1");
        let status = resolver(tmp.path()).status("r1").await.unwrap();
        assert_eq!(status, SyncStatus::without_counts(SyncState::NoRemote));
    }

    #[tokio::test]
    async fn configured_but_never_fetched_is_no_remote() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = init_bare(tmp.path(), "r1");
        git()
            .remote_add(&repo, "github", "https://github.com/o/r.git")
            .await
            .unwrap();
        commit_labeled(&repo, "main", 1, "local");
        let status = resolver(tmp.path()).status("r1").await.unwrap();
        assert_eq!(status.status, SyncState::NoRemote);
    }

    #[tokio::test]
    async fn ahead_behind_and_diverged() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = init_bare(tmp.path(), "r1");
        git()
            .remote_add(&repo, "github", "https://github.com/o/r.git")
            .await
            .unwrap();
        let r = resolver(tmp.path());

        commit_labeled(&repo, "main", 2, "base");
        let base = rev(&repo, "refs/heads/main");
        track(&repo, &base);
        assert_eq!(r.status("r1").await.unwrap(), SyncStatus::from_counts(0, 0));

        commit_labeled(&repo, "main", 3, "local");
        assert_eq!(r.status("r1").await.unwrap(), SyncStatus::from_counts(3, 0));

        // Move the tracking ref onto a sibling history.
        std::process::Command::new("git")
            .arg("-C")
            .arg(&repo)
            .args(["update-ref", "refs/heads/upstream", &base])
            .status()
            .unwrap();
        commit_labeled(&repo, "upstream", 1, "remote");
        track(&repo, &rev(&repo, "refs/heads/upstream"));
        assert_eq!(
            r.status("r1").await.unwrap(),
            SyncStatus {
                ahead: 3,
                behind: 1,
                status: SyncState::Diverged
            }
        );
    }

    #[tokio::test]
    async fn missing_repository_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            resolver(tmp.path()).status("ghost").await,
            Err(CoreError::RepositoryNotFound(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_maps_to_error_state() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let repo = init_bare(tmp.path(), "r1");
        let script = tmp.path().join("slow-git");
        std::fs::write(&script, "#!/bin/sh\nsleep 10\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let metrics = MetricsRegistry::new();
        let resolver = StatusResolver::new(
            Git::new(&script, Duration::from_millis(200)),
            BareRepos::new(tmp.path()),
            &SyncConfig::default(),
            metrics.metrics.clone(),
        );
        let status = resolver.status_at(&repo).await;
        assert_eq!(status.status, SyncState::Error);
        assert_eq!(metrics.metrics.git_timeouts_total.get(), 1);
    }
}
