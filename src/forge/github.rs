//! GitHub / GitHub Enterprise REST backend.

use anyhow::{Context, Result};
use reqwest::StatusCode;
use tracing::{debug, warn};

use super::ForgeBackend;
use crate::config::GitHubConfig;

const ACCEPT: &str = "application/vnd.github+json";

pub struct GitHubBackend {
    api_url: String,
    http: reqwest::Client,
}

impl GitHubBackend {
    pub fn new(config: &GitHubConfig, http: reqwest::Client) -> Self {
        Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            http,
        }
    }
}

#[async_trait::async_trait]
impl ForgeBackend for GitHubBackend {
    async fn verify_token(&self, token: &str) -> Result<Option<String>> {
        let url = format!("{}/user", self.api_url);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(token)
            .header("Accept", ACCEPT)
            .header("X-GitHub-Api-Version", "2022-11-28")
            .send()
            .await
            .context("GitHub API request failed")?;

        match resp.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                warn!(status = %resp.status(), "GitHub rejected token");
                return Ok(None);
            }
            status if !status.is_success() => {
                anyhow::bail!("GET {url} returned {status}");
            }
            _ => {}
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse GitHub /user response")?;
        let login = extract_login(&body);
        debug!(login = ?login, "GitHub token verified");
        Ok(login)
    }
}

fn extract_login(body: &serde_json::Value) -> Option<String> {
    body.get("login")
        .and_then(|v| v.as_str())
        .filter(|l| !l.is_empty())
        .map(str::to_string)
}
