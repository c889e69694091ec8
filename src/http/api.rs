//! JSON management API for remote configuration and GitHub sync.
//!
//! Mounted at `/api`.  Every route requires Basic credentials of a user
//! holding the administrator capability; anything else gets the same 401
//! as a denied git request.

use std::sync::Arc;

use bytes::Bytes;
use axum::extract::{Extension, Path, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use super::error::{denied_response, AppError};
use crate::auth::BasicCredential;
use crate::domain::{Capability, User};
use crate::sync::ConnectRequest;
use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/repos/{id}/sync-status", get(sync_status))
        .route("/repos/{id}/sync", post(sync))
        .route("/repos/{id}/push", post(push))
        .route("/repos/{id}/pull", post(pull))
        .route("/repos/{id}/remote", put(set_remote).delete(remove_remote))
        .route("/repos/{id}/connect", post(connect))
        .route("/repos/{id}/disconnect", post(disconnect))
        .route_layer(middleware::from_fn_with_state(state, require_admin))
}

/// Authenticate and require [`Capability::Administrator`].  The acting
/// [`User`] is handed to handlers as a request extension.
async fn require_admin(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let credential = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(BasicCredential::from_header);
    let Some(credential) = credential else {
        return denied_response();
    };

    match state.gate.authenticator().authenticate(&credential).await {
        Ok(user) if user.has(Capability::Administrator) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Ok(user) => {
            warn!(user = %user.username, path = %request.uri().path(), "management API needs administrator");
            denied_response()
        }
        Err(e) => AppError::Core(e).into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
struct BranchBody {
    #[serde(default)]
    branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemoteBody {
    url: String,
}

/// Push and pull accept an empty body or `{"branch": ...}`.
fn parse_branch(body: &Bytes) -> Result<Option<String>, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let parsed: BranchBody = serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("invalid JSON body: {e}")))?;
    Ok(parsed.branch.filter(|b| !b.is_empty()))
}

#[instrument(skip(state))]
async fn sync_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    state.registry.get(&id).await?;
    let status = state.engine.resolver().status(&id).await?;
    Ok(Json(status).into_response())
}

/// Runs a full sync.  Partial failures come back as 502 with the outcome
/// body so callers still see the post-sync status.
#[instrument(skip(state, user), fields(user = %user.username))]
async fn sync(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let credential = state.credentials.resolve(&id, Some(&user.id)).await?;
    let outcome = state
        .engine
        .sync_with_remote(&id, credential.as_ref())
        .await?;
    let status = if outcome.is_success() {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    Ok((status, Json(outcome)).into_response())
}

#[instrument(skip(state, user, body), fields(user = %user.username))]
async fn push(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, AppError> {
    let branch = parse_branch(&body)?;
    let credential = state.credentials.resolve(&id, Some(&user.id)).await?;
    let pushed = state
        .engine
        .push_to_remote(&id, branch.as_deref(), credential.as_ref())
        .await?;
    Ok(Json(json!({ "repo_id": id, "branch": pushed })).into_response())
}

#[instrument(skip(state, user, body), fields(user = %user.username))]
async fn pull(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, AppError> {
    let branch = parse_branch(&body)?;
    let credential = state.credentials.resolve(&id, Some(&user.id)).await?;
    let pulled = state
        .engine
        .pull_from_remote(&id, branch.as_deref(), credential.as_ref())
        .await?;
    Ok(Json(json!({ "repo_id": id, "branch": pulled })).into_response())
}

#[instrument(skip(state, body))]
async fn set_remote(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<RemoteBody>,
) -> Result<Response, AppError> {
    let url = state.engine.configure_remote(&id, &body.url).await?;
    info!(repo_id = %id, remote_url = %url, "remote configured");
    Ok(Json(json!({ "repo_id": id, "remote_url": url })).into_response())
}

#[instrument(skip(state))]
async fn remove_remote(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    state.engine.remove_remote(&id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[instrument(skip(state, request))]
async fn connect(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<ConnectRequest>,
) -> Result<Response, AppError> {
    let repo = state.lifecycle.connect(&id, &request).await?;
    Ok(Json(repo).into_response())
}

#[instrument(skip(state))]
async fn disconnect(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let repo = state.lifecycle.disconnect(&id).await?;
    Ok(Json(repo).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_body_is_optional() {
        assert_eq!(parse_branch(&Bytes::new()).unwrap(), None);
        assert_eq!(parse_branch(&Bytes::from_static(b"  \n")).unwrap(), None);
        assert_eq!(parse_branch(&Bytes::from_static(b"{}")).unwrap(), None);
        assert_eq!(
            parse_branch(&Bytes::from_static(br#"{"branch":"dev"}"#)).unwrap(),
            Some("dev".to_string())
        );
        assert_eq!(
            parse_branch(&Bytes::from_static(br#"{"branch":""}"#)).unwrap(),
            None
        );
        assert!(parse_branch(&Bytes::from_static(b"branch=dev")).is_err());
    }
}
