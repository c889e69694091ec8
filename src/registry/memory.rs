use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{RegistryError, RepositoryRegistry, UserStore};
use crate::auth::digest::{digest_secret, new_salt, verify_secret};
use crate::domain::{AccessToken, RepositoryRef, User};

fn poisoned() -> RegistryError {
    RegistryError::Backend("in-memory store lock poisoned".into())
}

/// In-process [`RepositoryRegistry`].
#[derive(Default)]
pub struct MemoryRegistry {
    repos: RwLock<HashMap<String, RepositoryRef>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repos(repos: impl IntoIterator<Item = RepositoryRef>) -> Self {
        let registry = Self::new();
        if let Ok(mut map) = registry.repos.write() {
            for repo in repos {
                map.insert(repo.id.clone(), repo);
            }
        }
        registry
    }
}

#[async_trait]
impl RepositoryRegistry for MemoryRegistry {
    async fn get(&self, id: &str) -> Result<RepositoryRef, RegistryError> {
        self.repos
            .read()
            .map_err(|_| poisoned())?
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    async fn update(&self, repo: &RepositoryRef) -> Result<(), RegistryError> {
        self.repos
            .write()
            .map_err(|_| poisoned())?
            .insert(repo.id.clone(), repo.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<RepositoryRef>, RegistryError> {
        let mut repos: Vec<_> = self
            .repos
            .read()
            .map_err(|_| poisoned())?
            .values()
            .cloned()
            .collect();
        repos.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(repos)
    }
}

struct StoredUser {
    user: User,
    salt: String,
    password_digest: String,
}

/// In-process [`UserStore`].
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<String, StoredUser>>,
    tokens: RwLock<HashMap<String, AccessToken>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: User, password: &str) {
        let salt = new_salt();
        let password_digest = digest_secret(&salt, password);
        if let Ok(mut users) = self.users.write() {
            users.insert(
                user.id.clone(),
                StoredUser {
                    user,
                    salt,
                    password_digest,
                },
            );
        }
    }

    pub fn add_token(&self, token_id: &str, user_id: &str, secret: &str) {
        let salt = new_salt();
        let token = AccessToken {
            id: token_id.to_string(),
            user_id: user_id.to_string(),
            secret_digest: digest_secret(&salt, secret),
            salt,
        };
        if let Ok(mut tokens) = self.tokens.write() {
            tokens.insert(token_id.to_string(), token);
        }
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_token(&self, token_id: &str) -> Result<Option<AccessToken>, RegistryError> {
        Ok(self
            .tokens
            .read()
            .map_err(|_| poisoned())?
            .get(token_id)
            .cloned())
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<User>, RegistryError> {
        Ok(self
            .users
            .read()
            .map_err(|_| poisoned())?
            .get(user_id)
            .map(|s| s.user.clone()))
    }

    async fn verify_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<User>, RegistryError> {
        let users = self.users.read().map_err(|_| poisoned())?;
        Ok(users
            .values()
            .find(|s| s.user.username == username)
            .filter(|s| verify_secret(&s.salt, password, &s.password_digest))
            .map(|s| s.user.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::domain::Visibility;

    #[tokio::test]
    async fn registry_get_update_list() {
        let registry = MemoryRegistry::with_repos([RepositoryRef::new("b", Visibility::Public)]);
        assert!(matches!(
            registry.get("a").await,
            Err(RegistryError::NotFound(_))
        ));

        let mut repo = RepositoryRef::new("a", Visibility::Private);
        registry.update(&repo).await.unwrap();
        repo.auto_sync = true;
        registry.update(&repo).await.unwrap();

        assert!(registry.get("a").await.unwrap().auto_sync);
        let ids: Vec<_> = registry
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn password_and_token_lookup() {
        let store = MemoryUserStore::new();
        store.add_user(
            User {
                id: "u1".into(),
                username: "alice".into(),
                capabilities: BTreeSet::new(),
            },
            "hunter2",
        );
        store.add_token("tok-123", "u1", "s3cr3t");

        assert!(store.verify_password("alice", "hunter2").await.unwrap().is_some());
        assert!(store.verify_password("alice", "nope").await.unwrap().is_none());
        assert!(store.verify_password("bob", "hunter2").await.unwrap().is_none());

        let token = store.find_token("tok-123").await.unwrap().unwrap();
        assert_eq!(token.user_id, "u1");
        assert!(verify_secret(&token.salt, "s3cr3t", &token.secret_digest));
        assert!(store.find_token("tok-999").await.unwrap().is_none());
    }
}
