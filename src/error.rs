//! Failure taxonomy for the gateway and sync core.

use std::time::Duration;

use thiserror::Error;

use crate::credentials::CredentialError;
use crate::git::GitError;
use crate::registry::RegistryError;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Bad or missing credentials.
    #[error("invalid credentials")]
    AuthenticationFailure,

    /// Valid identity without the capability the operation requires.
    #[error("insufficient capability")]
    AuthorizationFailure,

    #[error("repository not found: {0}")]
    RepositoryNotFound(String),

    /// `git remote add|set-url|remove` failed.
    #[error("remote configuration failed: {0}")]
    RemoteConfigurationFailure(String),

    /// fetch/push exited non-zero.  Carries the combined git output.
    #[error("transport failed: {0}")]
    TransportFailure(String),

    #[error("{command} timed out after {timeout:?}")]
    ResolutionTimeout { command: String, timeout: Duration },

    #[error("credential store: {0}")]
    CredentialStore(#[from] CredentialError),

    #[error("registry: {0}")]
    Registry(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    /// True for failures that must look identical to the git client.
    pub fn is_access_denied(&self) -> bool {
        matches!(
            self,
            CoreError::AuthenticationFailure
                | CoreError::AuthorizationFailure
                | CoreError::RepositoryNotFound(_)
        )
    }

    /// Classify a git failure from a fetch or push.
    pub fn transport(err: GitError) -> Self {
        match err {
            GitError::Timeout { command, timeout } => {
                CoreError::ResolutionTimeout { command, timeout }
            }
            other => CoreError::TransportFailure(other.diagnostics()),
        }
    }

    /// Classify a git failure from remote configuration.
    pub fn remote_config(err: GitError) -> Self {
        match err {
            GitError::Timeout { command, timeout } => {
                CoreError::ResolutionTimeout { command, timeout }
            }
            other => CoreError::RemoteConfigurationFailure(other.diagnostics()),
        }
    }
}

impl From<RegistryError> for CoreError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => CoreError::RepositoryNotFound(id),
            other => CoreError::Registry(other.to_string()),
        }
    }
}
