//! GitHub credential resolution.
//!
//! Tokens live in an external secret store (KeyDB-backed in production, with
//! an in-process fallback when it is unreachable).  They are fetched fresh
//! for every sync, push or pull and injected into a call-scoped URL.

pub mod keydb;
pub mod store;
pub mod remote_url;

use std::sync::Arc;

use tracing::debug;

pub use keydb::KeyDbCredentialStore;
pub use store::{
    CredentialError, CredentialStore, FallbackCredentialStore, MemoryCredentialStore, SecretMap,
};
pub use remote_url::{authenticated_url, normalize_remote_url, redact_credentials, GitHubCredential};

/// Secret path of a repository's integration token.
pub fn repo_credential_path(repo_id: &str) -> String {
    format!("repositories/{repo_id}/github")
}

/// Secret path of a user's GitHub OAuth token.
pub fn user_credential_path(user_id: &str) -> String {
    format!("users/{user_id}/github")
}

/// Looks up the best available credential for a repository operation.
#[derive(Clone)]
pub struct CredentialResolver {
    store: Arc<dyn CredentialStore>,
}

impl CredentialResolver {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Repository integration token first, then the acting user's OAuth
    /// token.  `Ok(None)` when neither exists.
    pub async fn resolve(
        &self,
        repo_id: &str,
        user_id: Option<&str>,
    ) -> Result<Option<GitHubCredential>, CredentialError> {
        let repo_path = repo_credential_path(repo_id);
        if let Some(map) = self.store.get_secret(&repo_path).await? {
            debug!(%repo_id, "using repository integration token");
            return parse_credential(&repo_path, &map, "token").map(Some);
        }

        if let Some(user_id) = user_id {
            let user_path = user_credential_path(user_id);
            if let Some(map) = self.store.get_secret(&user_path).await? {
                debug!(%repo_id, %user_id, "using user OAuth token");
                return parse_credential(&user_path, &map, "access_token").map(Some);
            }
        }

        debug!(%repo_id, "no GitHub credential available");
        Ok(None)
    }

    pub async fn store_repo_credential(
        &self,
        repo_id: &str,
        credential: &GitHubCredential,
    ) -> Result<(), CredentialError> {
        let mut map = SecretMap::new();
        map.insert("token".into(), credential.token.clone().into());
        if let Some(username) = &credential.username {
            map.insert("username".into(), username.clone().into());
        }
        self.store
            .store_secret(&repo_credential_path(repo_id), map)
            .await
    }

    pub async fn delete_repo_credential(&self, repo_id: &str) -> Result<(), CredentialError> {
        self.store.delete_secret(&repo_credential_path(repo_id)).await
    }
}

fn parse_credential(
    path: &str,
    map: &SecretMap,
    token_key: &str,
) -> Result<GitHubCredential, CredentialError> {
    let token = map
        .get(token_key)
        .and_then(|v| v.as_str())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| CredentialError::Malformed {
            path: path.to_string(),
            reason: format!("missing '{token_key}'"),
        })?;
    let username = map
        .get("username")
        .and_then(|v| v.as_str())
        .filter(|u| !u.is_empty())
        .map(str::to_string);
    Ok(GitHubCredential {
        token: token.to_string(),
        username,
    })
}
