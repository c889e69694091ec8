//! Bare Git repository lookup on the local filesystem.
//!
//! Repositories live at `<root>/<id>.git`.  IDs are validated before they
//! are ever joined onto the root so a crafted ID cannot escape it.

use std::path::{Path, PathBuf};

use tracing::{debug, instrument, warn};

use crate::domain::is_valid_repo_id;

#[derive(Debug, Clone)]
pub struct BareRepos {
    root: PathBuf,
}

impl BareRepos {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path for `repo_id`, or `None` for IDs that are not URL-safe.
    pub fn path(&self, repo_id: &str) -> Option<PathBuf> {
        is_valid_repo_id(repo_id).then(|| self.root.join(format!("{repo_id}.git")))
    }

    /// Path for `repo_id` if a valid bare repository exists there.
    pub async fn open(&self, repo_id: &str) -> Option<PathBuf> {
        let path = self.path(repo_id)?;
        validate_bare_repo(&path).await.then_some(path)
    }
}

/// Check whether `path` looks like a valid bare Git repository.
///
/// A bare repo must be a directory that contains a `HEAD` file.  This is a
/// lightweight heuristic, not a full integrity check.
#[instrument(fields(path = %path.display()))]
pub async fn validate_bare_repo(path: &Path) -> bool {
    let is_dir = tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);

    if !is_dir {
        debug!("path does not exist or is not a directory");
        return false;
    }

    let head_exists = tokio::fs::metadata(path.join("HEAD"))
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);

    if !head_exists {
        debug!("HEAD file not found; not a valid bare repo");
        return false;
    }

    let objects_ok = tokio::fs::metadata(path.join("objects"))
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);

    if !objects_ok {
        warn!(
            path = %path.display(),
            "HEAD exists but objects/ directory is missing"
        );
        return false;
    }

    true
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
