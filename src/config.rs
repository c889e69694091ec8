use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub keydb: KeyDbConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub github: GitHubConfig,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address for the HTTP listener (e.g. `0.0.0.0:8080`).
    pub http_listen: String,
    /// Path prefix under which the smart-HTTP gateway is mounted.  Once the
    /// prefix is stripped the first path segment is the repository ID.
    #[serde(default = "default_mount_prefix")]
    pub mount_prefix: String,
}

fn default_mount_prefix() -> String {
    "/repo".to_string()
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory holding one `<id>.git` bare repository per registry
    /// entry.
    pub repos_path: PathBuf,
}

// ---------------------------------------------------------------------------
// KeyDB / Redis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct KeyDbConfig {
    /// Connection string (e.g. `rediss://keydb.local:6380`).
    pub endpoint: String,
    /// Enable TLS for the KeyDB connection.
    #[serde(default = "bool_true")]
    pub tls: bool,
    /// Name of the environment variable that holds the KeyDB auth token.
    #[serde(default = "default_keydb_auth_env")]
    pub auth_token_env: String,
    /// Prefix applied to every key written by this service.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn bool_true() -> bool {
    true
}

fn default_keydb_auth_env() -> String {
    "KEYDB_AUTH_TOKEN".to_string()
}

fn default_key_prefix() -> String {
    "forgegate".to_string()
}

// ---------------------------------------------------------------------------
// Git toolchain
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct GitConfig {
    /// Git executable to invoke.
    #[serde(default = "default_git_binary")]
    pub binary: String,
    /// Upper bound (seconds) for fetch, push and remote configuration calls.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    /// Upper bound (seconds) for read-only status queries.
    #[serde(default = "default_status_timeout")]
    pub status_timeout_secs: u64,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            binary: default_git_binary(),
            command_timeout_secs: default_command_timeout(),
            status_timeout_secs: default_status_timeout(),
        }
    }
}

impl GitConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.status_timeout_secs)
    }
}

fn default_git_binary() -> String {
    "git".to_string()
}

fn default_command_timeout() -> u64 {
    60
}

fn default_status_timeout() -> u64 {
    15
}

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Name of the remote that mirrors the GitHub repository.
    #[serde(default = "default_remote_name")]
    pub remote_name: String,
    /// Branch used when the bare repository's `HEAD` cannot be resolved.
    #[serde(default = "default_fallback_branch")]
    pub fallback_branch: String,
    /// Host used when translating `git@host:owner/repo` remotes to HTTPS.
    #[serde(default = "default_github_host")]
    pub github_host: String,
    /// Interval (seconds) between auto-sync passes.  `0` disables the
    /// scheduler.
    #[serde(default = "default_auto_sync_interval")]
    pub auto_sync_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_name: default_remote_name(),
            fallback_branch: default_fallback_branch(),
            github_host: default_github_host(),
            auto_sync_interval_secs: default_auto_sync_interval(),
        }
    }
}

fn default_remote_name() -> String {
    "github".to_string()
}

fn default_fallback_branch() -> String {
    "master".to_string()
}

fn default_github_host() -> String {
    "github.com".to_string()
}

fn default_auto_sync_interval() -> u64 {
    900
}

// ---------------------------------------------------------------------------
// Workspace notification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    /// Endpoint that receives a POST after every accepted push.  Absent
    /// disables notifications.
    #[serde(default)]
    pub workspace_url: Option<String>,
    /// Delay (milliseconds) between the push response and the notification.
    #[serde(default = "default_notify_delay")]
    pub delay_ms: u64,
    #[serde(default = "default_notify_timeout")]
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            workspace_url: None,
            delay_ms: default_notify_delay(),
            timeout_secs: default_notify_timeout(),
        }
    }
}

fn default_notify_delay() -> u64 {
    2000
}

fn default_notify_timeout() -> u64 {
    10
}

// ---------------------------------------------------------------------------
// GitHub API
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubConfig {
    /// Full URL to the API root.
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load and validate a [`Config`] from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    parse_config(&contents)
        .with_context(|| format!("failed to load config file: {}", path.display()))
}

/// Parse and validate a [`Config`] from YAML text.
pub fn parse_config(contents: &str) -> Result<Config> {
    let config: Config = serde_yaml::from_str(contents).context("invalid YAML config")?;
    validate_config(&config)?;
    Ok(config)
}

/// Basic sanity checks that cannot be expressed purely with serde.
fn validate_config(config: &Config) -> Result<()> {
    anyhow::ensure!(
        config.server.mount_prefix.starts_with('/'),
        "server.mount_prefix must start with '/'"
    );
    anyhow::ensure!(
        config.server.mount_prefix.len() > 1,
        "server.mount_prefix must not be the root path"
    );
    anyhow::ensure!(
        config.git.command_timeout_secs > 0 && config.git.status_timeout_secs > 0,
        "git timeouts must be non-zero"
    );
    anyhow::ensure!(
        !config.sync.remote_name.is_empty() && !config.sync.fallback_branch.is_empty(),
        "sync.remote_name and sync.fallback_branch must not be empty"
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
server:
  http_listen: "127.0.0.1:8080"
storage:
  repos_path: /srv/repos
keydb:
  endpoint: "redis://localhost:6379"
"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.server.mount_prefix, "/repo");
        assert_eq!(config.sync.remote_name, "github");
        assert_eq!(config.sync.fallback_branch, "master");
        assert_eq!(config.git.command_timeout(), Duration::from_secs(60));
        assert_eq!(config.keydb.key_prefix, "forgegate");
        assert!(config.keydb.tls);
        assert!(config.notify.workspace_url.is_none());
    }

    #[test]
    fn rejects_relative_mount_prefix() {
        let yaml = MINIMAL.replace(
            "http_listen: \"127.0.0.1:8080\"",
            "http_listen: \"127.0.0.1:8080\"\n  mount_prefix: repo",
        );
        assert!(parse_config(&yaml).is_err());
    }

    #[test]
    fn rejects_zero_timeout() {
        let yaml = format!("{MINIMAL}git:\n  command_timeout_secs: 0\n");
        assert!(parse_config(&yaml).is_err());
    }

    #[test]
    fn overrides_are_applied() {
        let yaml = format!(
            "{MINIMAL}sync:\n  fallback_branch: main\n  auto_sync_interval_secs: 0\nnotify:\n  workspace_url: http://ws.local/refresh\n  delay_ms: 10\n"
        );
        let config = parse_config(&yaml).unwrap();
        assert_eq!(config.sync.fallback_branch, "main");
        assert_eq!(config.sync.auto_sync_interval_secs, 0);
        assert_eq!(
            config.notify.workspace_url.as_deref(),
            Some("http://ws.local/refresh")
        );
        assert_eq!(config.notify.delay_ms, 10);
    }
}
