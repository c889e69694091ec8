//! Value types shared by the gateway and the sync engine.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    #[default]
    Private,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            other => Err(format!("unknown visibility: {other}")),
        }
    }
}

/// Which way commits flow between the local bare repository and GitHub.
/// Repositories without an explicit direction push.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    #[default]
    Push,
    Pull,
    Both,
}

impl SyncDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncDirection::Push => "push",
            SyncDirection::Pull => "pull",
            SyncDirection::Both => "both",
        }
    }
}

impl FromStr for SyncDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(SyncDirection::Push),
            "pull" => Ok(SyncDirection::Pull),
            "both" => Ok(SyncDirection::Both),
            other => Err(format!("unknown sync direction: {other}")),
        }
    }
}

/// Registry view of one hosted bare repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub id: String,
    pub visibility: Visibility,
    /// Credential-free GitHub URL the mirror points at.
    pub remote_url: Option<String>,
    pub sync_direction: Option<SyncDirection>,
    pub auto_sync: bool,
    /// True only while a mirror remote exists in the bare repository config.
    pub remote_configured: bool,
    /// Time of the last sync attempt, successful or not.
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl RepositoryRef {
    pub fn new(id: impl Into<String>, visibility: Visibility) -> Self {
        Self {
            id: id.into(),
            visibility,
            remote_url: None,
            sync_direction: None,
            auto_sync: false,
            remote_configured: false,
            last_sync_at: None,
        }
    }

    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }
}

/// Repository IDs double as path segments and directory names, so only a
/// conservative character set is accepted.
pub fn is_valid_repo_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Capabilities a user may hold.  Authorization checks test set membership
/// rather than a single admin flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Administrator,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Administrator => "administrator",
        }
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "administrator" | "admin" => Ok(Capability::Administrator),
            other => Err(format!("unknown capability: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,
}

impl User {
    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Stored personal access token.  Only a salted digest of the secret is
/// kept.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub id: String,
    pub user_id: String,
    pub salt: String,
    pub secret_digest: String,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}
