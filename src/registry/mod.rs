//! Repository registry and identity store contracts.
//!
//! Both are owned by the wider platform; the gateway and sync engine only
//! read them and request repository metadata updates.  Production uses the
//! KeyDB-backed implementations, tests the in-memory ones.

pub mod keydb;
#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{AccessToken, RepositoryRef, User};

pub use keydb::{KeyDbRegistry, KeyDbUserStore};
#[cfg(test)]
pub use memory::{MemoryRegistry, MemoryUserStore};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("repository not found: {0}")]
    NotFound(String),

    #[error("registry backend error: {0}")]
    Backend(String),

    #[error("corrupt registry entry {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

#[async_trait]
pub trait RepositoryRegistry: Send + Sync {
    async fn get(&self, id: &str) -> Result<RepositoryRef, RegistryError>;

    /// Persist `repo`, replacing the stored metadata.
    async fn update(&self, repo: &RepositoryRef) -> Result<(), RegistryError>;

    async fn list(&self) -> Result<Vec<RepositoryRef>, RegistryError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Access token by its public identifier.
    async fn find_token(&self, token_id: &str) -> Result<Option<AccessToken>, RegistryError>;

    async fn get_user(&self, user_id: &str) -> Result<Option<User>, RegistryError>;

    /// The user whose password matches, or `None`.
    async fn verify_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<User>, RegistryError>;
}
