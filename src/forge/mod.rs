//! Forge API access.
//!
//! Only token verification is needed: connecting a repository proves the
//! supplied GitHub token works before it is stored.

pub mod github;

use anyhow::Result;

pub use github::GitHubBackend;

#[async_trait::async_trait]
pub trait ForgeBackend: Send + Sync {
    /// Login of the account owning `token`, or `None` when the forge
    /// rejects it.  Transport failures are errors.
    async fn verify_token(&self, token: &str) -> Result<Option<String>>;
}
