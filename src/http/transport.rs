//! Stateless-RPC smart-HTTP transport backed by the local git binary.
//!
//! - `GET  /{repo}/info/refs?service=git-upload-pack|git-receive-pack`
//! - `POST /{repo}/git-upload-pack`
//! - `POST /{repo}/git-receive-pack`
//!
//! Every handler runs behind [`super::gateway::authorize`] and receives the
//! resulting [`AccessGrant`].

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context as _};
use axum::body::Body;
use bytes::Bytes;
use axum::extract::{Extension, Query, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use flate2::read::GzDecoder;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tokio_stream::StreamExt as _;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, error, instrument, warn};

use super::error::AppError;
use super::pktline::{requests_v2, service_header};
use crate::auth::policy::{RECEIVE_PACK, UPLOAD_PACK};
use crate::auth::{AccessGrant, OperationKind};
use crate::error::CoreError;
use crate::AppState;

/// Compressed request bodies larger than this are refused.
const MAX_GZIP_BODY: usize = 64 * 1024 * 1024;

/// Ceiling on a decompressed request body.
const MAX_INFLATED_BODY: usize = 256 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct InfoRefsQuery {
    service: Option<String>,
}

/// `GET /{repo}/info/refs`
#[instrument(skip_all, fields(repo_id = %grant.repo.id))]
pub async fn info_refs(
    State(state): State<Arc<AppState>>,
    Extension(grant): Extension<AccessGrant>,
    Query(query): Query<InfoRefsQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let service = match query.service.as_deref() {
        Some(s @ (UPLOAD_PACK | RECEIVE_PACK)) => s,
        Some(other) => {
            return Ok((StatusCode::FORBIDDEN, format!("Unsupported service: {other}\n"))
                .into_response())
        }
        None => {
            return Ok((
                StatusCode::FORBIDDEN,
                "Dumb HTTP transport is not supported\n",
            )
                .into_response())
        }
    };

    // The gate classified this request from the same decoded query; a
    // receive-pack advertisement is only ever served on a push grant.
    if service == RECEIVE_PACK && grant.operation != OperationKind::Push {
        return Err(CoreError::AuthorizationFailure.into());
    }

    let repo = repo_path(&state, &grant).await?;
    let git_protocol = git_protocol(&headers);
    let child = state
        .git
        .spawn_service(subcommand(service), &repo, true, git_protocol.as_deref())
        .map_err(|e| AppError::Internal(anyhow!(e)))?;

    let output = tokio::time::timeout(state.git.timeout(), child.wait_with_output())
        .await
        .map_err(|_| {
            CoreError::ResolutionTimeout {
                command: format!("{service} --advertise-refs"),
                timeout: state.git.timeout(),
            }
        })?
        .with_context(|| format!("{service} --advertise-refs failed"))?;
    if !output.status.success() {
        return Err(AppError::Internal(anyhow!(
            "{service} --advertise-refs exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let mut body = Vec::with_capacity(output.stdout.len() + 64);
    if !requests_v2(git_protocol.as_deref()) {
        body.extend_from_slice(&service_header(service));
    }
    body.extend_from_slice(&output.stdout);

    debug!(service, bytes = body.len(), "advertised refs");
    Ok((
        StatusCode::OK,
        no_cache_headers(&format!("application/x-{service}-advertisement")),
        body,
    )
        .into_response())
}

/// `POST /{repo}/git-upload-pack`
pub async fn upload_pack(
    State(state): State<Arc<AppState>>,
    Extension(grant): Extension<AccessGrant>,
    request: Request,
) -> Result<Response, AppError> {
    service_rpc(&state, &grant, UPLOAD_PACK, request).await
}

/// `POST /{repo}/git-receive-pack`
pub async fn receive_pack(
    State(state): State<Arc<AppState>>,
    Extension(grant): Extension<AccessGrant>,
    request: Request,
) -> Result<Response, AppError> {
    if grant.operation != OperationKind::Push {
        return Err(CoreError::AuthorizationFailure.into());
    }
    service_rpc(&state, &grant, RECEIVE_PACK, request).await
}

#[instrument(skip(state, grant, request), fields(repo_id = %grant.repo.id))]
async fn service_rpc(
    state: &AppState,
    grant: &AccessGrant,
    service: &'static str,
    request: Request,
) -> Result<Response, AppError> {
    let expected = format!("application/x-{service}-request");
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    if content_type != Some(expected.as_str()) {
        return Ok((
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            format!("expected Content-Type {expected}\n"),
        )
            .into_response());
    }

    let gzip = request
        .headers()
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("gzip") || v.eq_ignore_ascii_case("x-gzip"));
    let git_protocol = git_protocol(request.headers());

    let repo = repo_path(state, grant).await?;
    let body = request.into_body();
    let source = if gzip {
        let compressed = axum::body::to_bytes(body, MAX_GZIP_BODY)
            .await
            .map_err(|e| AppError::BadRequest(format!("unreadable request body: {e}")))?;
        let plain = gunzip(&compressed, MAX_INFLATED_BODY)
            .map_err(|e| AppError::BadRequest(format!("bad gzip body: {e}")))?;
        BodySource::Buffered(Bytes::from(plain))
    } else {
        BodySource::Streaming(body)
    };

    let mut child = state
        .git
        .spawn_service(subcommand(service), &repo, false, git_protocol.as_deref())
        .map_err(|e| AppError::Internal(anyhow!(e)))?;

    let stdin = child
        .stdin
        .take()
        .context("git service stdin not captured")?;
    let stdout = child
        .stdout
        .take()
        .context("git service stdout not captured")?;

    tokio::spawn(feed_stdin(stdin, source));
    reap(child, service);

    Ok((
        StatusCode::OK,
        no_cache_headers(&format!("application/x-{service}-result")),
        Body::from_stream(ReaderStream::new(stdout)),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Where the child's stdin comes from: a decompressed buffer or the live
/// request stream.
enum BodySource {
    Buffered(Bytes),
    Streaming(Body),
}

async fn feed_stdin(mut stdin: tokio::process::ChildStdin, source: BodySource) {
    let result = match source {
        BodySource::Buffered(bytes) => stdin.write_all(&bytes).await,
        BodySource::Streaming(body) => {
            let stream = body.into_data_stream().map(|r| r.map_err(io::Error::other));
            let mut reader = StreamReader::new(stream);
            tokio::io::copy(&mut reader, &mut stdin).await.map(drop)
        }
    };
    if let Err(e) = result {
        // The child may exit early (e.g. on a protocol error) and close its
        // end of the pipe.
        debug!(error = %e, "request body not fully delivered to git");
    }
}

/// Wait for the child in the background and log a failed exit.
fn reap(mut child: Child, service: &'static str) {
    let stderr = child.stderr.take();
    tokio::spawn(async move {
        let mut diagnostics = String::new();
        if let Some(mut stderr) = stderr {
            let _ = stderr.read_to_string(&mut diagnostics).await;
        }
        match child.wait().await {
            Ok(status) if !status.success() => {
                warn!(service, %status, stderr = %diagnostics.trim(), "git service exited with failure");
            }
            Err(e) => error!(service, error = %e, "failed to wait on git service"),
            _ => {}
        }
    });
}

/// Inflate `data`, failing once the output would exceed `limit` bytes.
fn gunzip(data: &[u8], limit: usize) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len().saturating_mul(4).min(limit));
    GzDecoder::new(data)
        .take(limit as u64 + 1)
        .read_to_end(&mut out)?;
    if out.len() > limit {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("inflated body exceeds {limit} bytes"),
        ));
    }
    Ok(out)
}

fn git_protocol(headers: &HeaderMap) -> Option<String> {
    headers
        .get("Git-Protocol")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// `git-upload-pack` → `upload-pack`.
fn subcommand(service: &str) -> &str {
    service.strip_prefix("git-").unwrap_or(service)
}

fn no_cache_headers(content_type: &str) -> [(header::HeaderName, HeaderValue); 3] {
    [
        (
            header::CONTENT_TYPE,
            HeaderValue::from_str(content_type)
                .unwrap_or(HeaderValue::from_static("application/octet-stream")),
        ),
        (
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache, max-age=0, must-revalidate"),
        ),
        (header::PRAGMA, HeaderValue::from_static("no-cache")),
    ]
}

async fn repo_path(state: &AppState, grant: &AccessGrant) -> Result<PathBuf, AppError> {
    state.repos.open(&grant.repo.id).await.ok_or_else(|| {
        AppError::Internal(anyhow!(
            "registry entry {} has no bare repository on disk",
            grant.repo.id
        ))
    })
}
