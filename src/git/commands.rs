//! Git command wrappers using [`tokio::process::Command`].
//!
//! Every call runs the configured `git` binary against one bare repository
//! (`git -C <repo> ...`), captures stdout/stderr and bounds the call with a
//! timeout.  A timed-out child is killed.  Retry policy belongs to callers.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::{debug, instrument};

use crate::credentials::redact_credentials;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Captured result of one git invocation.
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    /// stdout and stderr joined, for diagnostics.
    pub fn combined(&self) -> String {
        let out = self.stdout.trim();
        let err = self.stderr.trim();
        match (out.is_empty(), err.is_empty()) {
            (true, _) => err.to_string(),
            (false, true) => out.to_string(),
            (false, false) => format!("{out}\n{err}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum GitError {
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} failed ({status}): {output}")]
    Failed {
        command: String,
        status: String,
        output: String,
    },

    #[error("{command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
}

impl GitError {
    /// Human-readable diagnostics with credentials redacted.
    pub fn diagnostics(&self) -> String {
        match self {
            GitError::Failed {
                command, output, ..
            } if !output.is_empty() => format!("{command}: {output}"),
            other => other.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Handle on the local git toolchain.
#[derive(Debug, Clone)]
pub struct Git {
    binary: PathBuf,
    timeout: Duration,
}

impl Git {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// Same toolchain, different bound.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            binary: self.binary.clone(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn command(&self, repo: &Path) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-C").arg(repo);
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }

    /// Run `git -C <repo> <args>` and return the output whatever the exit
    /// status.  Only spawn failures and timeouts are errors.
    pub async fn run_unchecked(&self, repo: &Path, args: &[&str]) -> Result<GitOutput, GitError> {
        let command = describe(args);
        let mut cmd = self.command(repo);
        cmd.args(args);

        debug!(%command, repo = %repo.display(), "spawning git");

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => return Err(GitError::Spawn { command, source }),
            Err(_) => {
                return Err(GitError::Timeout {
                    command,
                    timeout: self.timeout,
                })
            }
        };

        Ok(GitOutput {
            status: output.status,
            stdout: redact_credentials(&String::from_utf8_lossy(&output.stdout)),
            stderr: redact_credentials(&String::from_utf8_lossy(&output.stderr)),
        })
    }

    /// Run `git -C <repo> <args>`; a non-zero exit becomes
    /// [`GitError::Failed`] carrying the combined output.
    pub async fn run(&self, repo: &Path, args: &[&str]) -> Result<GitOutput, GitError> {
        let output = self.run_unchecked(repo, args).await?;
        if !output.status.success() {
            return Err(GitError::Failed {
                command: describe(args),
                status: output.status.to_string(),
                output: output.combined(),
            });
        }
        Ok(output)
    }

    // -----------------------------------------------------------------------
    // Remotes
    // -----------------------------------------------------------------------

    #[instrument(skip(self, url), fields(repo = %repo.display()))]
    pub async fn remote_add(&self, repo: &Path, name: &str, url: &str) -> Result<(), GitError> {
        self.run(repo, &["remote", "add", name, url]).await.map(drop)
    }

    #[instrument(skip(self, url), fields(repo = %repo.display()))]
    pub async fn remote_set_url(&self, repo: &Path, name: &str, url: &str) -> Result<(), GitError> {
        self.run(repo, &["remote", "set-url", name, url])
            .await
            .map(drop)
    }

    #[instrument(skip(self), fields(repo = %repo.display()))]
    pub async fn remote_remove(&self, repo: &Path, name: &str) -> Result<(), GitError> {
        self.run(repo, &["remote", "remove", name]).await.map(drop)
    }

    /// URL of `name`, or `None` when the remote does not exist.
    pub async fn remote_get_url(&self, repo: &Path, name: &str) -> Result<Option<String>, GitError> {
        let output = self
            .run_unchecked(repo, &["remote", "get-url", name])
            .await?;
        if !output.status.success() {
            return Ok(None);
        }
        let url = output.stdout.trim();
        Ok((!url.is_empty()).then(|| url.to_string()))
    }

    /// All configured remote names.
    pub async fn remotes(&self, repo: &Path) -> Result<Vec<String>, GitError> {
        let output = self.run(repo, &["remote"]).await?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    // -----------------------------------------------------------------------
    // Refs
    // -----------------------------------------------------------------------

    /// Short name of the branch `HEAD` points at.
    pub async fn head_branch(&self, repo: &Path) -> Result<String, GitError> {
        let output = self
            .run(repo, &["symbolic-ref", "--short", "HEAD"])
            .await?;
        let branch = output.stdout.trim();
        if branch.is_empty() {
            return Err(GitError::Failed {
                command: "git symbolic-ref --short HEAD".into(),
                status: output.status.to_string(),
                output: "empty symbolic ref".into(),
            });
        }
        Ok(branch.to_string())
    }

    /// Object id of `rev`, or `None` when it does not resolve.
    pub async fn resolve_ref(&self, repo: &Path, rev: &str) -> Result<Option<String>, GitError> {
        let output = self
            .run_unchecked(repo, &["rev-parse", "--verify", "--quiet", rev])
            .await?;
        let oid = output.stdout.trim();
        if !output.status.success() || oid.is_empty() {
            return Ok(None);
        }
        Ok(Some(oid.to_string()))
    }

    /// `(left-only, right-only)` commit counts between two revisions.
    pub async fn count_left_right(
        &self,
        repo: &Path,
        left: &str,
        right: &str,
    ) -> Result<(u64, u64), GitError> {
        let range = format!("{left}...{right}");
        let output = self
            .run(repo, &["rev-list", "--left-right", "--count", &range])
            .await?;
        parse_left_right(&output.stdout).ok_or_else(|| GitError::Failed {
            command: format!("git rev-list --left-right --count {range}"),
            status: output.status.to_string(),
            output: format!("unparseable output: {}", output.stdout.trim()),
        })
    }

    /// Commits reachable from `rev`.
    pub async fn count_commits(&self, repo: &Path, rev: &str) -> Result<u64, GitError> {
        let output = self.run(repo, &["rev-list", "--count", rev]).await?;
        output
            .stdout
            .trim()
            .parse()
            .map_err(|_| GitError::Failed {
                command: format!("git rev-list --count {rev}"),
                status: output.status.to_string(),
                output: format!("unparseable output: {}", output.stdout.trim()),
            })
    }

    pub async fn update_ref(&self, repo: &Path, name: &str, target: &str) -> Result<(), GitError> {
        self.run(repo, &["update-ref", name, target]).await.map(drop)
    }

    // -----------------------------------------------------------------------
    // Transfer
    // -----------------------------------------------------------------------

    /// `git fetch <source> <refspecs...>`.  `source` may be a remote name or
    /// a (possibly credential-bearing) URL.
    #[instrument(skip(self, source), fields(repo = %repo.display()))]
    pub async fn fetch(
        &self,
        repo: &Path,
        source: &str,
        refspecs: &[&str],
    ) -> Result<GitOutput, GitError> {
        let mut args = vec!["fetch", "--no-tags", source];
        args.extend_from_slice(refspecs);
        self.run(repo, &args).await
    }

    /// `git push <target> <refspec>`.
    #[instrument(skip(self, target), fields(repo = %repo.display()))]
    pub async fn push(
        &self,
        repo: &Path,
        target: &str,
        refspec: &str,
    ) -> Result<GitOutput, GitError> {
        self.run(repo, &["push", "--porcelain", target, refspec]).await
    }

    // -----------------------------------------------------------------------
    // Smart-HTTP services
    // -----------------------------------------------------------------------

    /// Spawn `git <service> --stateless-rpc [--advertise-refs] <repo>` with
    /// piped stdio.  `service` is `upload-pack` or `receive-pack`.  The
    /// caller owns the child; no timeout applies because pack transfers are
    /// bounded by the client connection instead.
    pub fn spawn_service(
        &self,
        service: &str,
        repo: &Path,
        advertise_refs: bool,
        git_protocol: Option<&str>,
    ) -> Result<Child, GitError> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(service).arg("--stateless-rpc");
        if advertise_refs {
            cmd.arg("--advertise-refs");
        }
        cmd.arg(repo);
        if let Some(proto) = git_protocol {
            cmd.env("GIT_PROTOCOL", proto);
        }
        cmd.stdin(if advertise_refs {
            Stdio::null()
        } else {
            Stdio::piped()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        cmd.spawn().map_err(|source| GitError::Spawn {
            command: format!("git {service}"),
            source,
        })
    }
}

/// Render an argument list for logs and errors with credentials redacted.
fn describe(args: &[&str]) -> String {
    redact_credentials(&format!("git {}", args.join(" ")))
}

/// Parse `rev-list --left-right --count` output (`"<left>\t<right>"`).
pub fn parse_left_right(stdout: &str) -> Option<(u64, u64)> {
    let mut parts = stdout.split_whitespace();
    let left = parts.next()?.parse().ok()?;
    let right = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((left, right))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
