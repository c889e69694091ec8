//! Authentication and authorisation for the smart-HTTP gateway and the
//! management API.
//!
//! Decisions are synchronous, per request, and share no mutable state:
//! every request re-reads the user store and the repository registry.

pub mod authenticator;
pub mod digest;
pub mod policy;

use std::sync::Arc;

use tracing::warn;

pub use authenticator::{Authenticator, BasicCredential};
pub use policy::{classify, OperationKind};

use crate::domain::{RepositoryRef, User};
use crate::error::CoreError;
use crate::registry::RepositoryRegistry;

/// Parsed view of an inbound git request, discarded after the decision.
#[derive(Debug, Clone)]
pub struct GitOperationRequest {
    pub repo_id: String,
    pub operation: OperationKind,
    pub credential: BasicCredential,
}

/// Outcome of a successful gateway decision.
#[derive(Debug, Clone)]
pub struct AccessGrant {
    pub user: User,
    pub repo: RepositoryRef,
    pub operation: OperationKind,
}

/// Authenticate, resolve the repository, then authorise.
#[derive(Clone)]
pub struct AccessGate {
    authenticator: Authenticator,
    registry: Arc<dyn RepositoryRegistry>,
}

impl AccessGate {
    pub fn new(authenticator: Authenticator, registry: Arc<dyn RepositoryRegistry>) -> Self {
        Self {
            authenticator,
            registry,
        }
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    /// Decide on `request`.  Errors carry the precise reason for operator
    /// logs; callers must present them to clients uniformly.
    pub async fn decide(&self, request: &GitOperationRequest) -> Result<AccessGrant, CoreError> {
        let user = self.authenticator.authenticate(&request.credential).await?;

        let repo = self.registry.get(&request.repo_id).await.map_err(|e| {
            warn!(repo_id = %request.repo_id, error = %e, "repository lookup failed");
            CoreError::from(e)
        })?;

        policy::authorize(&user, request.operation, &repo)?;

        Ok(AccessGrant {
            user,
            repo,
            operation: request.operation,
        })
    }
}
