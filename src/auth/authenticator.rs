//! HTTP Basic credential validation.
//!
//! The username is first treated as a personal-access-token identifier; if
//! a token with that ID exists and its secret matches the password, the
//! token's owner is the caller.  Otherwise the pair is checked as a regular
//! username/password.  Every failure collapses into
//! [`CoreError::AuthenticationFailure`].

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use tracing::{debug, warn};

use crate::auth::digest::verify_secret;
use crate::domain::User;
use crate::error::CoreError;
use crate::registry::UserStore;

/// Username/secret pair from an `Authorization: Basic` header.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicCredential {
    pub username: String,
    pub secret: String,
}

impl fmt::Debug for BasicCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicCredential")
            .field("username", &self.username)
            .field("secret", &"***")
            .finish()
    }
}

impl BasicCredential {
    /// Parse a `Basic <base64(user:pass)>` header value.  Fails closed when
    /// either field is empty.
    pub fn from_header(value: &str) -> Option<Self> {
        let (scheme, encoded) = value.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (username, secret) = decoded.split_once(':')?;
        if username.is_empty() || secret.is_empty() {
            return None;
        }
        Some(Self {
            username: username.to_string(),
            secret: secret.to_string(),
        })
    }
}

#[derive(Clone)]
pub struct Authenticator {
    users: Arc<dyn UserStore>,
}

impl Authenticator {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    pub async fn authenticate(&self, credential: &BasicCredential) -> Result<User, CoreError> {
        match self.try_token(credential).await {
            Ok(Some(user)) => {
                debug!(user = %user.username, "authenticated via access token");
                return Ok(user);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "access token lookup failed; trying password");
            }
        }

        match self
            .users
            .verify_password(&credential.username, &credential.secret)
            .await
        {
            Ok(Some(user)) => {
                debug!(user = %user.username, "authenticated via password");
                Ok(user)
            }
            Ok(None) => Err(CoreError::AuthenticationFailure),
            Err(e) => {
                warn!(error = %e, "password lookup failed");
                Err(CoreError::AuthenticationFailure)
            }
        }
    }

    async fn try_token(&self, credential: &BasicCredential) -> Result<Option<User>, CoreError> {
        let Some(token) = self.users.find_token(&credential.username).await? else {
            return Ok(None);
        };
        if !verify_secret(&token.salt, &credential.secret, &token.secret_digest) {
            return Ok(None);
        }
        Ok(self.users.get_user(&token.user_id).await?)
    }
}
