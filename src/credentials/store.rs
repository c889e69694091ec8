//! Secret store contract and in-process implementations.
//!
//! The core only depends on [`CredentialStore`].  Secrets are JSON maps
//! addressed by a slash-separated path (`users/<id>/github`,
//! `repositories/<id>/github`).  Nothing here caches: every call goes to the
//! backing store so revoked tokens stop working on the next operation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

pub type SecretMap = serde_json::Map<String, serde_json::Value>;

/// Errors from secret storage operations.  Messages never include secret
/// values.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential store unavailable: {0}")]
    Unavailable(String),

    #[error("credential store backend error: {0}")]
    Backend(String),

    #[error("malformed secret at {path}: {reason}")]
    Malformed { path: String, reason: String },
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Read the secret at `path`.  `Ok(None)` when nothing is stored there.
    async fn get_secret(&self, path: &str) -> Result<Option<SecretMap>, CredentialError>;

    /// Overwrite the secret at `path`.
    async fn store_secret(&self, path: &str, value: SecretMap) -> Result<(), CredentialError>;

    /// Remove the secret at `path`.  Deleting a missing path succeeds.
    async fn delete_secret(&self, path: &str) -> Result<(), CredentialError>;

    /// `false` while the store is running in a degraded mode.
    fn is_available(&self) -> bool;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Process-local store.  Serves as the degraded fallback and as a test
/// double.
#[derive(Default)]
pub struct MemoryCredentialStore {
    secrets: RwLock<HashMap<String, SecretMap>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get_secret(&self, path: &str) -> Result<Option<SecretMap>, CredentialError> {
        let secrets = self
            .secrets
            .read()
            .map_err(|_| CredentialError::Backend("memory store poisoned".into()))?;
        Ok(secrets.get(path).cloned())
    }

    async fn store_secret(&self, path: &str, value: SecretMap) -> Result<(), CredentialError> {
        let mut secrets = self
            .secrets
            .write()
            .map_err(|_| CredentialError::Backend("memory store poisoned".into()))?;
        secrets.insert(path.to_string(), value);
        Ok(())
    }

    async fn delete_secret(&self, path: &str) -> Result<(), CredentialError> {
        let mut secrets = self
            .secrets
            .write()
            .map_err(|_| CredentialError::Backend("memory store poisoned".into()))?;
        secrets.remove(path);
        Ok(())
    }

    fn is_available(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Fallback wrapper
// ---------------------------------------------------------------------------

/// Routes to the primary store while it reports itself available and to a
/// process-local store otherwise.  Secrets written in degraded mode live
/// only as long as the process.
pub struct FallbackCredentialStore {
    primary: Arc<dyn CredentialStore>,
    fallback: MemoryCredentialStore,
}

impl FallbackCredentialStore {
    pub fn new(primary: Arc<dyn CredentialStore>) -> Self {
        Self {
            primary,
            fallback: MemoryCredentialStore::new(),
        }
    }

    fn active(&self, op: &'static str, path: &str) -> &dyn CredentialStore {
        if self.primary.is_available() {
            self.primary.as_ref()
        } else {
            warn!(op, path, "credential store unavailable; using in-process fallback");
            &self.fallback
        }
    }
}

#[async_trait]
impl CredentialStore for FallbackCredentialStore {
    async fn get_secret(&self, path: &str) -> Result<Option<SecretMap>, CredentialError> {
        self.active("get", path).get_secret(path).await
    }

    async fn store_secret(&self, path: &str, value: SecretMap) -> Result<(), CredentialError> {
        self.active("store", path).store_secret(path, value).await
    }

    async fn delete_secret(&self, path: &str) -> Result<(), CredentialError> {
        // Deletes go to both so a secret stored while degraded cannot
        // outlive a disconnect.  The primary copy is what survives a
        // restart, so a delete it never saw is a failure.
        self.fallback.delete_secret(path).await?;
        if !self.primary.is_available() {
            warn!(path, "credential store unavailable; primary copy not deleted");
            return Err(CredentialError::Unavailable(format!(
                "cannot delete {path} while the credential store is unreachable"
            )));
        }
        self.primary.delete_secret(path).await
    }

    fn is_available(&self) -> bool {
        self.primary.is_available()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    fn secret(token: &str) -> SecretMap {
        let mut map = SecretMap::new();
        map.insert("token".into(), serde_json::Value::String(token.into()));
        map
    }

    /// Memory store whose availability can be toggled.
    struct Flaky {
        inner: MemoryCredentialStore,
        up: AtomicBool,
    }

    #[async_trait]
    impl CredentialStore for Flaky {
        async fn get_secret(&self, path: &str) -> Result<Option<SecretMap>, CredentialError> {
            self.inner.get_secret(path).await
        }
        async fn store_secret(&self, path: &str, value: SecretMap) -> Result<(), CredentialError> {
            self.inner.store_secret(path, value).await
        }
        async fn delete_secret(&self, path: &str) -> Result<(), CredentialError> {
            self.inner.delete_secret(path).await
        }
        fn is_available(&self) -> bool {
            self.up.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn memory_store_crud() {
        let store = MemoryCredentialStore::new();
        assert!(store.get_secret("a").await.unwrap().is_none());
        store.store_secret("a", secret("t1")).await.unwrap();
        assert_eq!(store.get_secret("a").await.unwrap(), Some(secret("t1")));
        store.delete_secret("a").await.unwrap();
        assert!(store.get_secret("a").await.unwrap().is_none());
        store.delete_secret("a").await.unwrap();
    }

    #[tokio::test]
    async fn fallback_switches_when_primary_down() {
        let primary = Arc::new(Flaky {
            inner: MemoryCredentialStore::new(),
            up: AtomicBool::new(true),
        });
        let store = FallbackCredentialStore::new(primary.clone());

        store.store_secret("p", secret("primary")).await.unwrap();
        assert!(store.is_available());

        primary.up.store(false, Ordering::SeqCst);
        assert!(!store.is_available());
        assert!(store.get_secret("p").await.unwrap().is_none());

        store.store_secret("p", secret("degraded")).await.unwrap();
        assert_eq!(store.get_secret("p").await.unwrap(), Some(secret("degraded")));

        primary.up.store(true, Ordering::SeqCst);
        assert_eq!(store.get_secret("p").await.unwrap(), Some(secret("primary")));
    }

    #[tokio::test]
    async fn fallback_delete_clears_both() {
        let primary = Arc::new(Flaky {
            inner: MemoryCredentialStore::new(),
            up: AtomicBool::new(false),
        });
        let store = FallbackCredentialStore::new(primary.clone());
        store.store_secret("p", secret("degraded")).await.unwrap();

        primary.up.store(true, Ordering::SeqCst);
        primary.inner.store_secret("p", secret("primary")).await.unwrap();
        store.delete_secret("p").await.unwrap();

        assert!(primary.inner.get_secret("p").await.unwrap().is_none());
        primary.up.store(false, Ordering::SeqCst);
        assert!(store.get_secret("p").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn degraded_delete_fails_and_keeps_the_primary_copy() {
        let primary = Arc::new(Flaky {
            inner: MemoryCredentialStore::new(),
            up: AtomicBool::new(true),
        });
        let store = FallbackCredentialStore::new(primary.clone());
        store.store_secret("p", secret("primary")).await.unwrap();

        primary.up.store(false, Ordering::SeqCst);
        store.store_secret("p", secret("degraded")).await.unwrap();
        let err = store.delete_secret("p").await.unwrap_err();
        assert!(matches!(err, CredentialError::Unavailable(_)));
        assert!(store.get_secret("p").await.unwrap().is_none());

        primary.up.store(true, Ordering::SeqCst);
        assert_eq!(store.get_secret("p").await.unwrap(), Some(secret("primary")));
        store.delete_secret("p").await.unwrap();
        assert!(store.get_secret("p").await.unwrap().is_none());
    }
}
