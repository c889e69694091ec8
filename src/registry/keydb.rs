//! KeyDB-backed registry and identity store.
//!
//! Key layout (all under the configured prefix):
//!
//! | Key                       | Type   | Content                           |
//! |---------------------------|--------|-----------------------------------|
//! | `<p>:repos`               | set    | every repository ID               |
//! | `<p>:repo:<id>`           | hash   | [`RepositoryRef`] fields          |
//! | `<p>:user:<id>`           | hash   | id, username, capabilities, salt, password_digest |
//! | `<p>:username:<name>`     | string | user ID                           |
//! | `<p>:token:<token_id>`    | hash   | user_id, salt, secret_digest      |

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fred::clients::Pool;
use fred::interfaces::{HashesInterface, KeysInterface, SetsInterface};
use tracing::{debug, trace};

use super::{RegistryError, RepositoryRegistry, UserStore};
use crate::auth::digest::verify_secret;
use crate::domain::{AccessToken, Capability, RepositoryRef, User};

fn backend(op: &str, err: fred::error::Error) -> RegistryError {
    RegistryError::Backend(format!("KeyDB {op} failed: {err}"))
}

// ---------------------------------------------------------------------------
// Repository registry
// ---------------------------------------------------------------------------

pub struct KeyDbRegistry {
    pool: Pool,
    prefix: String,
}

impl KeyDbRegistry {
    pub fn new(pool: Pool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
        }
    }

    fn repo_key(&self, id: &str) -> String {
        format!("{}:repo:{id}", self.prefix)
    }

    fn index_key(&self) -> String {
        format!("{}:repos", self.prefix)
    }
}

#[async_trait]
impl RepositoryRegistry for KeyDbRegistry {
    async fn get(&self, id: &str) -> Result<RepositoryRef, RegistryError> {
        let key = self.repo_key(id);
        let map: HashMap<String, String> = self
            .pool
            .hgetall(&key)
            .await
            .map_err(|e| backend("HGETALL", e))?;
        if map.is_empty() {
            trace!(%id, "repository not in registry");
            return Err(RegistryError::NotFound(id.to_string()));
        }
        repo_from_map(id, &map).map_err(|reason| RegistryError::Corrupt { key, reason })
    }

    async fn update(&self, repo: &RepositoryRef) -> Result<(), RegistryError> {
        let key = self.repo_key(&repo.id);
        let _: () = self
            .pool
            .hset(&key, repo_to_pairs(repo))
            .await
            .map_err(|e| backend("HSET", e))?;
        let _: () = self
            .pool
            .sadd(self.index_key(), repo.id.as_str())
            .await
            .map_err(|e| backend("SADD", e))?;
        debug!(repo_id = %repo.id, "registry entry written");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<RepositoryRef>, RegistryError> {
        let mut ids: Vec<String> = self
            .pool
            .smembers(self.index_key())
            .await
            .map_err(|e| backend("SMEMBERS", e))?;
        ids.sort();

        let mut repos = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get(&id).await {
                Ok(repo) => repos.push(repo),
                Err(RegistryError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(repos)
    }
}

// ---------------------------------------------------------------------------
// RepositoryRef <-> flat hash
// ---------------------------------------------------------------------------

fn repo_to_pairs(repo: &RepositoryRef) -> Vec<(String, String)> {
    vec![
        ("id".into(), repo.id.clone()),
        ("visibility".into(), repo.visibility.as_str().into()),
        ("remote_url".into(), repo.remote_url.clone().unwrap_or_default()),
        (
            "sync_direction".into(),
            repo.sync_direction
                .map(|d| d.as_str().to_string())
                .unwrap_or_default(),
        ),
        ("auto_sync".into(), repo.auto_sync.to_string()),
        ("remote_configured".into(), repo.remote_configured.to_string()),
        (
            "last_sync_at".into(),
            repo.last_sync_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
        ),
    ]
}

fn non_empty(map: &HashMap<String, String>, field: &str) -> Option<String> {
    map.get(field).filter(|v| !v.is_empty()).cloned()
}

fn repo_from_map(id: &str, map: &HashMap<String, String>) -> Result<RepositoryRef, String> {
    let visibility = match non_empty(map, "visibility") {
        Some(v) => v.parse()?,
        None => Default::default(),
    };
    let sync_direction = non_empty(map, "sync_direction")
        .map(|v| v.parse())
        .transpose()?;
    let last_sync_at = non_empty(map, "last_sync_at")
        .map(|v| {
            DateTime::parse_from_rfc3339(&v)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| format!("bad last_sync_at: {e}"))
        })
        .transpose()?;

    Ok(RepositoryRef {
        id: id.to_string(),
        visibility,
        remote_url: non_empty(map, "remote_url"),
        sync_direction,
        auto_sync: map.get("auto_sync").is_some_and(|v| v == "true"),
        remote_configured: map.get("remote_configured").is_some_and(|v| v == "true"),
        last_sync_at,
    })
}

// ---------------------------------------------------------------------------
// User / token store
// ---------------------------------------------------------------------------

pub struct KeyDbUserStore {
    pool: Pool,
    prefix: String,
}

impl KeyDbUserStore {
    pub fn new(pool: Pool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
        }
    }

    async fn user_record(&self, user_id: &str) -> Result<Option<HashMap<String, String>>, RegistryError> {
        let map: HashMap<String, String> = self
            .pool
            .hgetall(format!("{}:user:{user_id}", self.prefix))
            .await
            .map_err(|e| backend("HGETALL", e))?;
        Ok((!map.is_empty()).then_some(map))
    }
}

fn parse_capabilities(raw: &str) -> BTreeSet<Capability> {
    raw.split(',')
        .map(str::trim)
        .filter_map(|c| c.parse().ok())
        .collect()
}

fn user_from_map(user_id: &str, map: &HashMap<String, String>) -> User {
    User {
        id: user_id.to_string(),
        username: map.get("username").cloned().unwrap_or_default(),
        capabilities: map
            .get("capabilities")
            .map(|c| parse_capabilities(c))
            .unwrap_or_default(),
    }
}

#[async_trait]
impl UserStore for KeyDbUserStore {
    async fn find_token(&self, token_id: &str) -> Result<Option<AccessToken>, RegistryError> {
        let map: HashMap<String, String> = self
            .pool
            .hgetall(format!("{}:token:{token_id}", self.prefix))
            .await
            .map_err(|e| backend("HGETALL", e))?;
        if map.is_empty() {
            return Ok(None);
        }
        Ok(Some(AccessToken {
            id: token_id.to_string(),
            user_id: map.get("user_id").cloned().unwrap_or_default(),
            salt: map.get("salt").cloned().unwrap_or_default(),
            secret_digest: map.get("secret_digest").cloned().unwrap_or_default(),
        }))
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<User>, RegistryError> {
        Ok(self
            .user_record(user_id)
            .await?
            .map(|map| user_from_map(user_id, &map)))
    }

    async fn verify_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<User>, RegistryError> {
        let user_id: Option<String> = self
            .pool
            .get(format!("{}:username:{username}", self.prefix))
            .await
            .map_err(|e| backend("GET", e))?;
        let Some(user_id) = user_id else {
            return Ok(None);
        };
        let Some(map) = self.user_record(&user_id).await? else {
            return Ok(None);
        };

        let salt = map.get("salt").map(String::as_str).unwrap_or_default();
        let digest = map
            .get("password_digest")
            .map(String::as_str)
            .unwrap_or_default();
        if !verify_secret(salt, password, digest) {
            return Ok(None);
        }
        Ok(Some(user_from_map(&user_id, &map)))
    }
}
