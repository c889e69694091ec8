//! Git command wrappers and bare repository lookup.
//!
//! All operations shell out to the `git` binary using `tokio::process::Command`
//! for non-blocking execution.  Credentials never reach this layer except as
//! call-scoped URLs, and every captured output is redacted.

pub mod bare_repo;
pub mod commands;

pub use bare_repo::BareRepos;
pub use commands::{Git, GitError, GitOutput};
