//! Reconciles a bare repository with its GitHub remote.
//!
//! Credentials are never written to the repository.  The persisted `github`
//! remote holds the credential-free URL; each fetch or push receives a
//! call-scoped authenticated URL inline, and explicit refspecs keep the
//! `refs/remotes/github/*` tracking refs current so status queries work
//! without the remote being reachable.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};

use super::locks::RepoLocks;
use super::resolve_branch;
use super::status::{StatusResolver, SyncStatus};
use crate::config::SyncConfig;
use crate::credentials::{authenticated_url, normalize_remote_url, GitHubCredential};
use crate::domain::{RepositoryRef, SyncDirection};
use crate::error::CoreError;
use crate::git::{BareRepos, Git, GitError};
use crate::metrics::{Metrics, Outcome};
use crate::registry::RepositoryRegistry;

/// Result of one [`SyncEngine::sync_with_remote`] call.  Sub-operation
/// failures are reported here rather than as an `Err` so partial success
/// stays observable.
#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub repo_id: String,
    pub direction: SyncDirection,
    pub branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_error: Option<String>,
    pub status: SyncStatus,
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        self.fetch_error.is_none() && self.push_error.is_none()
    }

    /// Every failure's diagnostics, separated by a blank line.
    pub fn error_message(&self) -> Option<String> {
        let errors: Vec<&str> = [&self.fetch_error, &self.push_error]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect();
        (!errors.is_empty()).then(|| errors.join("\n\n"))
    }

    fn metric_outcome(&self) -> Outcome {
        let attempted = match self.direction {
            SyncDirection::Both => 2,
            _ => 1,
        };
        let failed = usize::from(self.fetch_error.is_some()) + usize::from(self.push_error.is_some());
        match failed {
            0 => Outcome::Success,
            n if n < attempted => Outcome::Partial,
            _ => Outcome::Failure,
        }
    }
}

pub struct SyncEngine {
    git: Git,
    repos: BareRepos,
    registry: Arc<dyn RepositoryRegistry>,
    config: SyncConfig,
    locks: RepoLocks,
    resolver: StatusResolver,
    metrics: Arc<Metrics>,
}

impl SyncEngine {
    pub fn new(
        git: Git,
        repos: BareRepos,
        registry: Arc<dyn RepositoryRegistry>,
        config: SyncConfig,
        resolver: StatusResolver,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            git,
            repos,
            registry,
            config,
            locks: RepoLocks::new(),
            resolver,
            metrics,
        }
    }

    pub fn resolver(&self) -> &StatusResolver {
        &self.resolver
    }

    // -----------------------------------------------------------------------
    // Remote configuration
    // -----------------------------------------------------------------------

    /// Point the `github` remote at `remote_url`, adding it if absent and
    /// overwriting it otherwise.  The stored URL never carries credentials.
    #[instrument(skip(self, remote_url))]
    pub async fn configure_remote(&self, repo_id: &str, remote_url: &str) -> Result<String, CoreError> {
        let url = normalize_remote_url(remote_url, &self.config.github_host)
            .map_err(|e| CoreError::RemoteConfigurationFailure(e.to_string()))?;

        // The entry is read under the lock so a concurrent sync's stamp is
        // not overwritten by the persist below.
        let _guard = self.locks.acquire(repo_id).await;
        let mut repo = self.registry.get(repo_id).await?;
        let path = self.open(repo_id).await?;
        let remote = self.config.remote_name.as_str();

        if let Err(add_err) = self.git.remote_add(&path, remote, &url).await {
            if let Err(set_err) = self.git.remote_set_url(&path, remote, &url).await {
                self.count_timeout(&set_err);
                return Err(match set_err {
                    GitError::Timeout { .. } => CoreError::remote_config(set_err),
                    _ => CoreError::RemoteConfigurationFailure(format!(
                        "{}\n\n{}",
                        add_err.diagnostics(),
                        set_err.diagnostics()
                    )),
                });
            }
        }

        repo.remote_url = Some(url.clone());
        repo.remote_configured = true;
        self.persist(&repo).await;
        info!(%repo_id, remote, "remote configured");
        Ok(url)
    }

    /// Drop the `github` remote.  A remote that does not exist counts as
    /// removed.
    #[instrument(skip(self))]
    pub async fn remove_remote(&self, repo_id: &str) -> Result<(), CoreError> {
        let _guard = self.locks.acquire(repo_id).await;
        let mut repo = self.registry.get(repo_id).await?;
        let path = self.open(repo_id).await?;
        let remote = self.config.remote_name.as_str();

        let exists = self
            .git
            .remote_get_url(&path, remote)
            .await
            .map_err(CoreError::remote_config)?
            .is_some();
        if exists {
            self.git
                .remote_remove(&path, remote)
                .await
                .map_err(|e| {
                    self.count_timeout(&e);
                    CoreError::remote_config(e)
                })?;
        }

        repo.remote_configured = false;
        self.persist(&repo).await;
        info!(%repo_id, existed = exists, "remote removed");
        Ok(())
    }

    /// Apply `edit` to the registry entry while holding the repository lock.
    pub async fn amend<F>(&self, repo_id: &str, edit: F) -> Result<RepositoryRef, CoreError>
    where
        F: FnOnce(&mut RepositoryRef),
    {
        let _guard = self.locks.acquire(repo_id).await;
        let mut repo = self.registry.get(repo_id).await?;
        edit(&mut repo);
        self.registry.update(&repo).await?;
        Ok(repo)
    }

    // -----------------------------------------------------------------------
    // Transfers
    // -----------------------------------------------------------------------

    /// Reconcile following the repository's configured direction (push when
    /// unset).  `lastSyncAt` records the attempt whatever the outcome.
    #[instrument(skip(self, credential))]
    pub async fn sync_with_remote(
        &self,
        repo_id: &str,
        credential: Option<&GitHubCredential>,
    ) -> Result<SyncOutcome, CoreError> {
        let _guard = self.locks.acquire(repo_id).await;
        let repo = self.registry.get(repo_id).await?;
        let path = self.open(repo_id).await?;
        let direction = repo.sync_direction.unwrap_or_default();
        let started = Instant::now();

        let result = self
            .sync_locked(&repo, &path, direction, credential)
            .await;
        self.stamp(repo_id).await;

        let elapsed = started.elapsed().as_secs_f64();
        let outcome = result.inspect_err(|e| {
            self.metrics.record_sync(direction, Outcome::Failure, elapsed);
            warn!(%repo_id, ?direction, error = %e, "sync aborted");
        })?;
        self.metrics
            .record_sync(direction, outcome.metric_outcome(), elapsed);
        match outcome.error_message() {
            None => info!(%repo_id, ?direction, branch = %outcome.branch, "sync complete"),
            Some(err) => warn!(%repo_id, ?direction, error = %err, "sync finished with errors"),
        }
        Ok(outcome)
    }

    async fn sync_locked(
        &self,
        repo: &RepositoryRef,
        path: &Path,
        direction: SyncDirection,
        credential: Option<&GitHubCredential>,
    ) -> Result<SyncOutcome, CoreError> {
        let target = self.target_url(repo, path, credential).await?;
        let branch = resolve_branch(&self.git, path, &self.config.fallback_branch).await;

        let mut fetch_error = None;
        let mut push_error = None;
        match direction {
            SyncDirection::Push => {
                push_error = self.push_branch(path, &target, &branch).await.err();
            }
            SyncDirection::Pull => {
                fetch_error = self.fetch_branch(path, &target, &branch, true).await.err();
            }
            SyncDirection::Both => {
                // The local branch only moves through the non-forced push.
                fetch_error = self.fetch_branch(path, &target, &branch, false).await.err();
                push_error = self.push_branch(path, &target, &branch).await.err();
            }
        }

        Ok(SyncOutcome {
            repo_id: repo.id.clone(),
            direction,
            branch,
            fetch_error: fetch_error.map(|e| e.diagnostics()),
            push_error: push_error.map(|e| e.diagnostics()),
            status: self.resolver.status_at(path).await,
        })
    }

    /// Push one branch (HEAD's when `branch` is `None`).  Returns the branch
    /// pushed.
    #[instrument(skip(self, credential))]
    pub async fn push_to_remote(
        &self,
        repo_id: &str,
        branch: Option<&str>,
        credential: Option<&GitHubCredential>,
    ) -> Result<String, CoreError> {
        self.transfer(repo_id, branch, credential, SyncDirection::Push)
            .await
    }

    /// Force-update one local branch from GitHub.  Returns the branch
    /// pulled.
    #[instrument(skip(self, credential))]
    pub async fn pull_from_remote(
        &self,
        repo_id: &str,
        branch: Option<&str>,
        credential: Option<&GitHubCredential>,
    ) -> Result<String, CoreError> {
        self.transfer(repo_id, branch, credential, SyncDirection::Pull)
            .await
    }

    async fn transfer(
        &self,
        repo_id: &str,
        branch: Option<&str>,
        credential: Option<&GitHubCredential>,
        direction: SyncDirection,
    ) -> Result<String, CoreError> {
        let _guard = self.locks.acquire(repo_id).await;
        let repo = self.registry.get(repo_id).await?;
        let path = self.open(repo_id).await?;
        let started = Instant::now();

        let result = async {
            let target = self.target_url(&repo, &path, credential).await?;
            let branch = match branch.filter(|b| !b.is_empty()) {
                Some(b) => b.to_string(),
                None => resolve_branch(&self.git, &path, &self.config.fallback_branch).await,
            };
            let moved = match direction {
                SyncDirection::Pull => self.fetch_branch(&path, &target, &branch, true).await,
                _ => self.push_branch(&path, &target, &branch).await,
            };
            moved.map(|()| branch).map_err(CoreError::transport)
        }
        .await;
        self.stamp(repo_id).await;

        let outcome = if result.is_ok() {
            Outcome::Success
        } else {
            Outcome::Failure
        };
        self.metrics
            .record_sync(direction, outcome, started.elapsed().as_secs_f64());
        match &result {
            Ok(branch) => info!(%repo_id, ?direction, %branch, "transfer complete"),
            Err(e) => warn!(%repo_id, ?direction, error = %e, "transfer failed"),
        }
        result
    }

    // -----------------------------------------------------------------------
    // Git plumbing
    // -----------------------------------------------------------------------

    /// `refs/heads/<b>:refs/heads/<b>`, then fast-forward the tracking ref to
    /// what GitHub now holds.
    async fn push_branch(&self, path: &Path, target: &str, branch: &str) -> Result<(), GitError> {
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        self.git
            .push(path, target, &refspec)
            .await
            .inspect_err(|e| self.count_timeout(e))?;

        let tracking = self.tracking_ref(branch);
        if let Err(e) = self
            .git
            .update_ref(path, &tracking, &format!("refs/heads/{branch}"))
            .await
        {
            warn!(%tracking, error = %e, "pushed but could not update tracking ref");
        }
        Ok(())
    }

    /// Fetch one branch into its tracking ref; with `update_local` also
    /// force-update the local branch.
    async fn fetch_branch(
        &self,
        path: &Path,
        target: &str,
        branch: &str,
        update_local: bool,
    ) -> Result<(), GitError> {
        let tracking = format!("+refs/heads/{branch}:{}", self.tracking_ref(branch));
        let local = format!("+refs/heads/{branch}:refs/heads/{branch}");
        let mut refspecs = vec![tracking.as_str()];
        if update_local {
            refspecs.insert(0, local.as_str());
        }
        self.git
            .fetch(path, target, &refspecs)
            .await
            .map(drop)
            .inspect_err(|e| self.count_timeout(e))
    }

    fn tracking_ref(&self, branch: &str) -> String {
        format!("refs/remotes/{}/{branch}", self.config.remote_name)
    }

    /// Call-scoped URL for one fetch or push: the persisted remote URL
    /// (falling back to the registry's copy) with `credential` embedded.
    async fn target_url(
        &self,
        repo: &RepositoryRef,
        path: &Path,
        credential: Option<&GitHubCredential>,
    ) -> Result<String, CoreError> {
        let persisted = self
            .git
            .remote_get_url(path, &self.config.remote_name)
            .await
            .map_err(CoreError::remote_config)?;
        let base = persisted.or_else(|| repo.remote_url.clone()).ok_or_else(|| {
            CoreError::RemoteConfigurationFailure(format!(
                "no '{}' remote configured for {}",
                self.config.remote_name, repo.id
            ))
        })?;
        Ok(match credential {
            Some(cred) => authenticated_url(&base, cred).expose().to_string(),
            None => base,
        })
    }

    async fn open(&self, repo_id: &str) -> Result<PathBuf, CoreError> {
        self.repos
            .open(repo_id)
            .await
            .ok_or_else(|| CoreError::RepositoryNotFound(repo_id.to_string()))
    }

    /// Record the attempt time on the freshest registry entry.
    async fn stamp(&self, repo_id: &str) {
        match self.registry.get(repo_id).await {
            Ok(mut repo) => {
                repo.last_sync_at = Some(Utc::now());
                self.persist(&repo).await;
            }
            Err(e) => warn!(%repo_id, error = %e, "could not record sync attempt"),
        }
    }

    async fn persist(&self, repo: &RepositoryRef) {
        if let Err(e) = self.registry.update(repo).await {
            warn!(repo_id = %repo.id, error = %e, "registry update failed");
        }
    }

    fn count_timeout(&self, err: &GitError) {
        if matches!(err, GitError::Timeout { .. }) {
            self.metrics.git_timeouts_total.inc();
        }
    }
}
