//! Connecting a repository to GitHub and tearing the link down again.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use super::engine::SyncEngine;
use crate::credentials::{CredentialResolver, GitHubCredential};
use crate::domain::{RepositoryRef, SyncDirection};
use crate::error::CoreError;
use crate::forge::ForgeBackend;

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectRequest {
    pub remote_url: String,
    pub token: String,
    /// Account name for the HTTP basic form; `x-access-token` when absent.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub direction: Option<SyncDirection>,
    #[serde(default)]
    pub auto_sync: bool,
}

#[derive(Clone)]
pub struct RemoteLifecycle {
    engine: Arc<SyncEngine>,
    credentials: CredentialResolver,
    forge: Arc<dyn ForgeBackend>,
}

impl RemoteLifecycle {
    pub fn new(
        engine: Arc<SyncEngine>,
        credentials: CredentialResolver,
        forge: Arc<dyn ForgeBackend>,
    ) -> Self {
        Self {
            engine,
            credentials,
            forge,
        }
    }

    /// Verify the token with GitHub, configure the credential-free remote,
    /// store the token as the repository credential and record the sync
    /// settings.  A remote that cannot be configured leaves any previously
    /// stored credential untouched.
    pub async fn connect(
        &self,
        repo_id: &str,
        request: &ConnectRequest,
    ) -> Result<RepositoryRef, CoreError> {
        let login = self
            .forge
            .verify_token(&request.token)
            .await
            .map_err(|e| CoreError::TransportFailure(format!("GitHub token check failed: {e:#}")))?
            .ok_or_else(|| {
                CoreError::RemoteConfigurationFailure("GitHub rejected the supplied token".into())
            })?;

        self.engine
            .configure_remote(repo_id, &request.remote_url)
            .await?;

        let credential = GitHubCredential {
            token: request.token.clone(),
            username: request.username.clone().filter(|u| !u.is_empty()),
        };
        self.credentials
            .store_repo_credential(repo_id, &credential)
            .await?;

        let repo = self
            .engine
            .amend(repo_id, |repo| {
                repo.sync_direction = request.direction;
                repo.auto_sync = request.auto_sync;
            })
            .await?;
        info!(%repo_id, github_user = %login, direction = ?request.direction, "repository connected");
        Ok(repo)
    }

    /// Remove the remote, revoke the stored credential and clear the remote
    /// fields.
    pub async fn disconnect(&self, repo_id: &str) -> Result<RepositoryRef, CoreError> {
        self.engine.remove_remote(repo_id).await?;
        if let Err(e) = self.credentials.delete_repo_credential(repo_id).await {
            warn!(%repo_id, error = %e, "could not delete repository credential");
            return Err(e.into());
        }
        let repo = self
            .engine
            .amend(repo_id, |repo| {
                repo.remote_url = None;
                repo.sync_direction = None;
                repo.auto_sync = false;
                repo.remote_configured = false;
            })
            .await?;
        info!(%repo_id, "repository disconnected");
        Ok(repo)
    }
}
