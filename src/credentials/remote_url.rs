//! Call-scoped credential injection into remote URLs.
//!
//! Bare repositories persist remote URLs in plaintext config, so tokens are
//! never written there.  Instead an [`AuthenticatedUrl`] is built for a
//! single git invocation and dropped when it returns.

use std::fmt;

use anyhow::{bail, Context as _, Result};
use url::Url;

/// GitHub token resolved from the credential store.
#[derive(Clone, PartialEq, Eq)]
pub struct GitHubCredential {
    pub token: String,
    /// When present the HTTP basic form `user:token@` is used instead of
    /// `x-access-token:token@`.
    pub username: Option<String>,
}

impl GitHubCredential {
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            username: None,
        }
    }
}

impl fmt::Debug for GitHubCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubCredential")
            .field("username", &self.username)
            .field("token", &"***")
            .finish()
    }
}

/// A remote URL with an embedded secret.  `Debug` and `Display` redact the
/// secret; only [`AuthenticatedUrl::expose`] yields the raw string.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthenticatedUrl(String);

impl AuthenticatedUrl {
    /// Raw URL for handing to the git subprocess.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthenticatedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthenticatedUrl({})", redact_url(&self.0))
    }
}

impl fmt::Display for AuthenticatedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&redact_url(&self.0))
    }
}

/// Normalise a user-supplied remote into the credential-free form that is
/// persisted in the bare repository.
///
/// - `git@host:owner/repo(.git)` and `ssh://git@host/owner/repo` become
///   `https://host/owner/repo.git`
/// - `owner/repo` shorthand resolves against `github_host`
/// - HTTP(S) URLs lose any embedded user-info
/// - local paths and `file://` URLs pass through untouched
pub fn normalize_remote_url(url: &str, github_host: &str) -> Result<String> {
    let url = url.trim();
    if url.is_empty() {
        bail!("remote URL is empty");
    }

    if let Some(rest) = url.strip_prefix("git@") {
        let Some((host, path)) = rest.split_once(':') else {
            bail!("malformed scp-style remote: {url}");
        };
        if host.is_empty() {
            bail!("malformed scp-style remote: {url}");
        }
        return Ok(https_repo_url(host, path));
    }

    if url.starts_with("ssh://") {
        let parsed = Url::parse(url).with_context(|| format!("malformed ssh remote: {url}"))?;
        let Some(host) = parsed.host_str().filter(|h| !h.is_empty()) else {
            bail!("malformed ssh remote: {url}");
        };
        return Ok(https_repo_url(host, parsed.path()));
    }

    if is_http(url) {
        let mut parsed = Url::parse(url)
            .with_context(|| format!("malformed remote URL: {}", redact_url(url)))?;
        if parsed.host_str().map_or(true, str::is_empty) {
            bail!("remote URL has no host: {}", redact_url(url));
        }
        strip_userinfo(&mut parsed);
        return Ok(parsed.into());
    }

    if url.starts_with("file://") || url.starts_with('/') || url.starts_with('.') {
        return Ok(url.to_string());
    }

    let segments: Vec<&str> = url.split('/').collect();
    if segments.len() == 2 && segments.iter().all(|s| !s.is_empty()) {
        return Ok(https_repo_url(github_host, url));
    }

    bail!("unsupported remote URL: {}", redact_url(url))
}

fn https_repo_url(host: &str, path: &str) -> String {
    let path = path.trim_start_matches('/');
    if path.ends_with(".git") {
        format!("https://{host}/{path}")
    } else {
        format!("https://{host}/{path}.git")
    }
}

fn is_http(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://")
}

fn strip_userinfo(url: &mut Url) {
    // Both setters only fail for URLs without a host, checked by callers.
    let _ = url.set_username("");
    let _ = url.set_password(None);
}

/// Build the authenticated URL for one git invocation.
///
/// Only HTTP(S) remotes can carry credentials; anything else (local paths,
/// `file://`) is returned unchanged.
pub fn authenticated_url(base: &str, credential: &GitHubCredential) -> AuthenticatedUrl {
    let parsed = is_http(base)
        .then(|| Url::parse(base).ok())
        .flatten()
        .filter(|u| u.host_str().is_some());
    let Some(mut url) = parsed else {
        return AuthenticatedUrl(base.to_string());
    };

    let user = credential.username.as_deref().unwrap_or("x-access-token");
    // Pre-encoded input only holds unreserved characters and `%XX`
    // escapes, which the setters keep as they are.
    let _ = url.set_username(&encode_userinfo(user));
    let _ = url.set_password(Some(&encode_userinfo(&credential.token)));
    AuthenticatedUrl(url.into())
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn encode_userinfo(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Replace the user-info of a single URL with `***`.
pub fn redact_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed)
            if parsed.has_host() && (!parsed.username().is_empty() || parsed.password().is_some()) =>
        {
            strip_userinfo(&mut parsed);
            if parsed.set_username("***").is_ok() {
                return parsed.into();
            }
            redact_credentials(url)
        }
        Ok(_) => url.to_string(),
        Err(_) => redact_credentials(url),
    }
}

/// Replace every `scheme://user:secret@` occurrence in free text (git stderr
/// echoes remote URLs) with `scheme://***@`.
pub fn redact_credentials(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(idx) = rest.find("://") {
        let (head, tail) = rest.split_at(idx + 3);
        out.push_str(head);

        let end = tail
            .find(|c: char| c.is_whitespace() || matches!(c, '/' | '\'' | '"' | '?' | '#'))
            .unwrap_or(tail.len());
        let authority = &tail[..end];
        match authority.rfind('@') {
            Some(at) => {
                out.push_str("***");
                out.push_str(&authority[at..]);
            }
            None => out.push_str(authority),
        }
        rest = &tail[end..];
    }

    out.push_str(rest);
    out
}
