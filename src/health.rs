use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use fred::clients::Pool;
use fred::interfaces::ClientLike;
use serde::Serialize;

use crate::credentials::CredentialStore;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub checks: HealthChecks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub keydb: CheckResult,
    pub credential_store: CheckResult,
    pub repositories: CheckResult,
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CheckResult {
    fn healthy() -> Self {
        Self {
            ok: true,
            detail: None,
        }
    }

    fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: Some(detail.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared state expected by the handler
// ---------------------------------------------------------------------------

/// The parts of `AppState` the health check looks at.
#[derive(Clone)]
pub struct HealthState {
    pub keydb: Option<Pool>,
    pub credentials: Arc<dyn CredentialStore>,
    pub repos_path: PathBuf,
}

// ---------------------------------------------------------------------------
// Individual checks
// ---------------------------------------------------------------------------

async fn check_keydb(pool: Option<&Pool>) -> CheckResult {
    let Some(pool) = pool else {
        return CheckResult {
            ok: true,
            detail: Some("not configured".into()),
        };
    };
    match pool.ping::<String>(None).await {
        Ok(_) => CheckResult::healthy(),
        Err(e) => CheckResult::unhealthy(format!("PING failed: {e}")),
    }
}

fn check_credential_store(store: &dyn CredentialStore) -> CheckResult {
    if store.is_available() {
        CheckResult::healthy()
    } else {
        CheckResult::unhealthy("running on the in-memory fallback")
    }
}

async fn check_repositories(root: PathBuf) -> CheckResult {
    let result = tokio::task::spawn_blocking(move || probe_writable(&root)).await;
    match result {
        Ok(Ok(())) => CheckResult::healthy(),
        Ok(Err(e)) => CheckResult::unhealthy(format!("repository root not writable: {e}")),
        Err(e) => CheckResult::unhealthy(format!("repository check task failed: {e}")),
    }
}

/// Create and remove a probe file under `root`.
fn probe_writable(root: &Path) -> std::io::Result<()> {
    if !root.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} is not a directory", root.display()),
        ));
    }
    let probe = root.join(format!(".forgegate-health-{}", uuid::Uuid::new_v4()));
    std::fs::write(&probe, b"ok")?;
    std::fs::remove_file(&probe)
}

// ---------------------------------------------------------------------------
// Aggregate status
// ---------------------------------------------------------------------------

fn aggregate_status(checks: &HealthChecks) -> HealthStatus {
    let all_ok = checks.keydb.ok && checks.credential_store.ok && checks.repositories.ok;
    // KeyDB backs the registry and user store; the repository root backs
    // every git operation.
    let any_critical = !checks.keydb.ok || !checks.repositories.ok;

    if all_ok {
        HealthStatus::Ok
    } else if any_critical {
        HealthStatus::Unhealthy
    } else {
        HealthStatus::Degraded
    }
}

// ---------------------------------------------------------------------------
// Axum handler
// ---------------------------------------------------------------------------

/// `GET /healthz` handler.  Returns 200 on Ok/Degraded, 503 on Unhealthy.
pub async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let (keydb, repositories) = tokio::join!(
        check_keydb(state.keydb.as_ref()),
        check_repositories(state.repos_path.clone()),
    );
    let credential_store = check_credential_store(state.credentials.as_ref());

    let checks = HealthChecks {
        keydb,
        credential_store,
        repositories,
    };
    let status = aggregate_status(&checks);
    let body = HealthResponse { status, checks };

    let http_status = match status {
        HealthStatus::Ok | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (http_status, Json(body))
}

#[cfg(test)]
mod tests {
    use axum::response::IntoResponse;

    use super::*;
    use crate::credentials::{CredentialError, SecretMap};

    struct Down;

    #[async_trait::async_trait]
    impl CredentialStore for Down {
        async fn get_secret(&self, _path: &str) -> Result<Option<SecretMap>, CredentialError> {
            Ok(None)
        }
        async fn store_secret(&self, _path: &str, _value: SecretMap) -> Result<(), CredentialError> {
            Ok(())
        }
        async fn delete_secret(&self, _path: &str) -> Result<(), CredentialError> {
            Ok(())
        }
        fn is_available(&self) -> bool {
            false
        }
    }

    fn state(credentials: Arc<dyn CredentialStore>, repos_path: PathBuf) -> HealthState {
        HealthState {
            keydb: None,
            credentials,
            repos_path,
        }
    }

    #[tokio::test]
    async fn degraded_credential_store_still_serves() {
        let tmp = tempfile::tempdir().unwrap();
        let resp = health_handler(State(state(Arc::new(Down), tmp.path().to_path_buf())))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["checks"]["credential_store"]["ok"], false);
    }

    #[tokio::test]
    async fn missing_repository_root_is_unhealthy() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(crate::credentials::MemoryCredentialStore::new());
        let resp = health_handler(State(state(store, tmp.path().join("absent"))))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn probe_leaves_nothing_behind() {
        let tmp = tempfile::tempdir().unwrap();
        probe_writable(tmp.path()).unwrap();
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }
}
