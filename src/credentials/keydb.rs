use async_trait::async_trait;
use fred::clients::Pool;
use fred::interfaces::{ClientLike, KeysInterface};
use tracing::trace;

use super::store::{CredentialError, CredentialStore, SecretMap};

/// [`CredentialStore`] backed by KeyDB.  Each secret is a JSON document at
/// `<prefix>:secret:<path>`.
pub struct KeyDbCredentialStore {
    pool: Pool,
    prefix: String,
}

impl KeyDbCredentialStore {
    pub fn new(pool: Pool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
        }
    }

    fn key(&self, path: &str) -> String {
        secret_key(&self.prefix, path)
    }
}

pub(crate) fn secret_key(prefix: &str, path: &str) -> String {
    format!("{prefix}:secret:{}", path.trim_matches('/'))
}

#[async_trait]
impl CredentialStore for KeyDbCredentialStore {
    async fn get_secret(&self, path: &str) -> Result<Option<SecretMap>, CredentialError> {
        let raw: Option<String> = self
            .pool
            .get(self.key(path))
            .await
            .map_err(|e| CredentialError::Backend(format!("KeyDB GET failed: {e}")))?;

        let Some(raw) = raw else {
            trace!(path, "secret not found");
            return Ok(None);
        };

        let map: SecretMap =
            serde_json::from_str(&raw).map_err(|e| CredentialError::Malformed {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Some(map))
    }

    async fn store_secret(&self, path: &str, value: SecretMap) -> Result<(), CredentialError> {
        let raw = serde_json::to_string(&value).map_err(|e| CredentialError::Malformed {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        let _: () = self
            .pool
            .set(self.key(path), raw, None, None, false)
            .await
            .map_err(|e| CredentialError::Backend(format!("KeyDB SET failed: {e}")))?;
        trace!(path, "secret stored");
        Ok(())
    }

    async fn delete_secret(&self, path: &str) -> Result<(), CredentialError> {
        let _: i64 = self
            .pool
            .del(self.key(path))
            .await
            .map_err(|e| CredentialError::Backend(format!("KeyDB DEL failed: {e}")))?;
        trace!(path, "secret deleted");
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.pool.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_key_layout() {
        assert_eq!(
            secret_key("forgegate", "repositories/r1/github"),
            "forgegate:secret:repositories/r1/github"
        );
        assert_eq!(
            secret_key("fg", "/users/u1/github/"),
            "fg:secret:users/u1/github"
        );
    }
}
