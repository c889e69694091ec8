//! Access decision in front of the smart-HTTP transport.
//!
//! Runs as route middleware on the git router, so nothing reaches a git
//! process until the decision is final and a denial is a plain 401 with no
//! protocol bytes.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{header, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, instrument};

use super::error::AppError;
use crate::auth::policy::RECEIVE_PACK;
use crate::auth::{classify, AccessGrant, BasicCredential, GitOperationRequest, OperationKind};
use crate::error::CoreError;
use crate::metrics::Decision;
use crate::notify::spawn_push_notification;
use crate::AppState;

/// First path segment with any `.git` suffix removed.  The router is
/// mounted with its prefix stripped, so this is the registry ID.
pub fn extract_repo_id(path: &str) -> Option<&str> {
    let segment = path.trim_start_matches('/').split('/').next()?;
    let id = segment.strip_suffix(".git").unwrap_or(segment);
    (!id.is_empty()).then_some(id)
}

#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn authorize(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let operation = classify(&path, request.uri().query());

    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let grant = match decide(&state, &path, authorization.as_deref(), operation).await {
        Ok(grant) => grant,
        Err(err) => {
            let decision = if err.is_access_denied() {
                Decision::Denied
            } else {
                Decision::Error
            };
            state.metrics.metrics.record_decision(operation, decision);
            return AppError::Core(err).into_response();
        }
    };

    state
        .metrics
        .metrics
        .record_decision(operation, Decision::Allowed);
    debug!(repo_id = %grant.repo.id, user = %grant.user.username, op = operation.as_str(), "access granted");

    let repo_id = grant.repo.id.clone();
    let is_push_rpc = request.method() == Method::POST
        && operation == OperationKind::Push
        && path.trim_end_matches('/').ends_with(RECEIVE_PACK);
    request.extensions_mut().insert(grant);

    let response = next.run(request).await;

    if is_push_rpc && response.status().is_success() {
        spawn_push_notification(
            state.notifier.clone(),
            state.metrics.metrics.clone(),
            repo_id,
            Duration::from_millis(state.config.notify.delay_ms),
        );
    }
    response
}

async fn decide(
    state: &AppState,
    path: &str,
    authorization: Option<&str>,
    operation: OperationKind,
) -> Result<AccessGrant, CoreError> {
    let repo_id = extract_repo_id(path)
        .ok_or_else(|| CoreError::RepositoryNotFound(path.to_string()))?;

    let credential = authorization
        .and_then(BasicCredential::from_header)
        .ok_or(CoreError::AuthenticationFailure)?;

    state
        .gate
        .decide(&GitOperationRequest {
            repo_id: repo_id.to_string(),
            operation,
            credential,
        })
        .await
}
