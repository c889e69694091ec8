//! HTTP layer for the forgegate gateway.
//!
//! The smart-HTTP transport is mounted under `server.mount_prefix` behind
//! the access gate; the management API lives under `/api`; `/healthz` and
//! `/metrics` are unauthenticated.

pub mod api;
pub mod error;
pub mod gateway;
pub mod pktline;
pub mod transport;

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;

use self::error::AppError;
use crate::AppState;

// ---------------------------------------------------------------------------
// Router construction
// ---------------------------------------------------------------------------

/// Build the axum [`Router`] with every route wired.
pub fn create_router(state: Arc<AppState>) -> Router {
    let git = Router::new()
        .route("/{repo}/info/refs", get(transport::info_refs))
        .route("/{repo}/git-upload-pack", post(transport::upload_pack))
        .route("/{repo}/git-receive-pack", post(transport::receive_pack))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            gateway::authorize,
        ));

    Router::new()
        .nest(&state.config.server.mount_prefix, git)
        .nest("/api", api::router(Arc::clone(&state)))
        .route("/healthz", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Operational endpoints
// ---------------------------------------------------------------------------

/// `GET /healthz`
async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health_state = crate::health::HealthState {
        keydb: state.keydb.clone(),
        credentials: Arc::clone(state.credentials.store()),
        repos_path: state.config.storage.repos_path.clone(),
    };
    crate::health::health_handler(State(health_state)).await
}

/// `GET /metrics`
async fn handle_metrics(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let body = state
        .metrics
        .encode()
        .map_err(|e| AppError::Internal(anyhow::anyhow!("metrics encoding failed: {e}")))?;

    Ok((
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        body,
    )
        .into_response())
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::error::DENIED_BODY;
    use super::test_support::{basic, test_app, TestApp};
    use super::*;
    use crate::domain::SyncDirection;
    use crate::git::test_support::{commit_into, config_get, init_bare, rev};
    use crate::registry::RepositoryRegistry;

    async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Response) {
        let resp = create_router(app.state.clone()).oneshot(request).await.unwrap();
        (resp.status(), resp)
    }

    async fn body_bytes(resp: Response) -> Vec<u8> {
        to_bytes(resp.into_body(), usize::MAX).await.unwrap().to_vec()
    }

    fn get(uri: &str, auth: Option<&str>) -> Request<Body> {
        let mut b = Request::builder().uri(uri);
        if let Some(auth) = auth {
            b = b.header(header::AUTHORIZATION, auth);
        }
        b.body(Body::empty()).unwrap()
    }

    fn api(method: &str, uri: &str, auth: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, auth)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn assert_denied(app: &TestApp, request: Request<Body>) {
        let (status, resp) = send(app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            resp.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Basic realm=\"forgegate\""
        );
        assert_eq!(body_bytes(resp).await, DENIED_BODY.as_bytes());
    }

    // -- gateway ----------------------------------------------------------

    #[tokio::test]
    async fn public_pull_advertises_refs() {
        let app = test_app();
        let (status, resp) = send(
            &app,
            get(
                "/repo/pub1/info/refs?service=git-upload-pack",
                Some(&basic("dev", "devpw")),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/x-git-upload-pack-advertisement"
        );
        let body = body_bytes(resp).await;
        assert!(body.starts_with(b"001e# service=git-upload-pack\n0000"));
        assert!(String::from_utf8_lossy(&body).contains("refs/heads/main"));
    }

    #[tokio::test]
    async fn v2_request_skips_service_header() {
        let app = test_app();
        let mut req = get(
            "/repo/pub1/info/refs?service=git-upload-pack",
            Some(&basic("dev", "devpw")),
        );
        req.headers_mut()
            .insert("Git-Protocol", "version=2".parse().unwrap());
        let (status, resp) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        let body = body_bytes(resp).await;
        assert!(body.starts_with(b"000eversion 2\n"));
    }

    #[tokio::test]
    async fn private_pull_needs_administrator() {
        let app = test_app();
        let uri = "/repo/priv1/info/refs?service=git-upload-pack";
        assert_denied(&app, get(uri, Some(&basic("dev", "devpw")))).await;

        let (status, _) = send(&app, get(uri, Some(&basic("admin", "adminpw")))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn push_needs_administrator_even_on_public_repos() {
        let app = test_app();
        let uri = "/repo/pub1/info/refs?service=git-receive-pack";
        assert_denied(&app, get(uri, Some(&basic("dev", "devpw")))).await;

        let (status, resp) = send(&app, get(uri, Some(&basic("tok-123", "s3cr3t")))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body_bytes(resp)
            .await
            .starts_with(b"001f# service=git-receive-pack\n0000"));
    }

    #[tokio::test]
    async fn encoded_receive_pack_service_is_still_a_push() {
        let app = test_app();
        for uri in [
            "/repo/pub1/info/refs?service=git%2Dreceive%2Dpack",
            "/repo/pub1/info/refs?service=git-receive%2Dpack&x=1",
        ] {
            assert_denied(&app, get(uri, Some(&basic("dev", "devpw")))).await;
        }
        let snapshot = app.state.metrics.encode().unwrap();
        assert!(snapshot.contains(r#"operation="Push",decision="Denied"} 2"#));

        let (status, resp) = send(
            &app,
            get(
                "/repo/pub1/info/refs?service=git%2Dreceive%2Dpack",
                Some(&basic("tok-123", "s3cr3t")),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body_bytes(resp)
            .await
            .starts_with(b"001f# service=git-receive-pack\n0000"));
    }

    #[tokio::test]
    async fn every_denial_looks_the_same() {
        let app = test_app();
        let uri = "/repo/pub1/info/refs?service=git-upload-pack";
        assert_denied(&app, get(uri, None)).await;
        assert_denied(&app, get(uri, Some(&basic("dev", "wrong")))).await;
        assert_denied(&app, get(uri, Some(&basic("tok-123", "nope")))).await;
        assert_denied(&app, get(uri, Some("Bearer abc"))).await;
        assert_denied(
            &app,
            get(
                "/repo/missing/info/refs?service=git-upload-pack",
                Some(&basic("admin", "adminpw")),
            ),
        )
        .await;
        let snapshot = app.state.metrics.encode().unwrap();
        assert!(snapshot.contains(r#"operation="Pull",decision="Denied"} 5"#));
    }

    #[tokio::test]
    async fn dumb_transport_is_refused() {
        let app = test_app();
        let (status, _) = send(
            &app,
            get("/repo/pub1/info/refs", Some(&basic("dev", "devpw"))),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn rpc_requires_matching_content_type() {
        let app = test_app();
        let req = Request::builder()
            .method("POST")
            .uri("/repo/pub1/git-upload-pack")
            .header(header::AUTHORIZATION, basic("dev", "devpw"))
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("0000"))
            .unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn bad_gzip_body_is_400() {
        let app = test_app();
        let req = Request::builder()
            .method("POST")
            .uri("/repo/pub1/git-upload-pack")
            .header(header::AUTHORIZATION, basic("dev", "devpw"))
            .header(header::CONTENT_TYPE, "application/x-git-upload-pack-request")
            .header(header::CONTENT_ENCODING, "gzip")
            .body(Body::from("definitely not gzip"))
            .unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    /// Real `git clone` and `git push` through a served router.
    #[tokio::test]
    async fn clone_and_push_end_to_end() {
        let app = test_app();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = create_router(app.state.clone());
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

        let work = app.tmp.path().join("work");
        let base = format!("http://admin:adminpw@{addr}/repo");
        let run = |args: Vec<String>| {
            let work = work.clone();
            async move {
                tokio::process::Command::new("git")
                    .args(&args)
                    .current_dir(work.parent().unwrap())
                    .env("GIT_TERMINAL_PROMPT", "0")
                    .env("GIT_AUTHOR_NAME", "Test")
                    .env("GIT_AUTHOR_EMAIL", "test@example.com")
                    .env("GIT_COMMITTER_NAME", "Test")
                    .env("GIT_COMMITTER_EMAIL", "test@example.com")
                    .output()
                    .await
                    .unwrap()
            }
        };

        let out = run(vec![
            "clone".into(),
            format!("{base}/pub1.git"),
            work.display().to_string(),
        ])
        .await;
        assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

        let wt = work.display().to_string();
        let out = run(vec![
            "-C".into(),
            wt.clone(),
            "-c".into(),
            "commit.gpgsign=false".into(),
            "commit".into(),
            "--allow-empty".into(),
            "-m".into(),
            "via gateway".into(),
        ])
        .await;
        assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

        let out = run(vec!["-C".into(), wt.clone(), "push".into(), "origin".into(), "HEAD:main".into()]).await;
        assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

        let out = run(vec!["-C".into(), wt, "rev-parse".into(), "HEAD".into()]).await;
        let pushed = String::from_utf8_lossy(&out.stdout).trim().to_string();
        assert_eq!(rev(&app.root.join("pub1.git"), "refs/heads/main"), pushed);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*app.notifier.seen.lock().unwrap(), vec!["pub1".to_string()]);
    }

    // -- management API ---------------------------------------------------

    #[tokio::test]
    async fn api_rejects_non_administrators() {
        let app = test_app();
        assert_denied(
            &app,
            get("/api/repos/pub1/sync-status", Some(&basic("dev", "devpw"))),
        )
        .await;
        assert_denied(&app, get("/api/repos/pub1/sync-status", None)).await;
    }

    #[tokio::test]
    async fn api_configure_sync_and_remove() {
        let app = test_app();
        let admin = basic("admin", "adminpw");
        let github = init_bare(&app.tmp.path().join("github"), "o-pub1");
        let github_url = github.display().to_string();

        let (status, resp) = send(&app, get("/api/repos/pub1/sync-status", Some(&admin))).await;
        assert_eq!(status, StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(body["status"], "no-remote");

        let (status, _) = send(
            &app,
            api(
                "PUT",
                "/api/repos/pub1/remote",
                &admin,
                &serde_json::json!({ "url": github_url }).to_string(),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            config_get(&app.root.join("pub1.git"), "remote.github.url").as_deref(),
            Some(github_url.as_str())
        );

        let (status, resp) = send(&app, api("POST", "/api/repos/pub1/sync", &admin, "")).await;
        assert_eq!(status, StatusCode::OK);
        let outcome: serde_json::Value = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(outcome["direction"], "push");
        assert_eq!(outcome["status"]["status"], "synced");
        assert_eq!(
            rev(&github, "refs/heads/main"),
            rev(&app.root.join("pub1.git"), "refs/heads/main")
        );
        assert!(app.registry.get("pub1").await.unwrap().last_sync_at.is_some());

        commit_into(&github, "main", 2);
        let (status, resp) = send(
            &app,
            api("POST", "/api/repos/pub1/pull", &admin, r#"{"branch":"main"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(body["branch"], "main");
        assert_eq!(
            rev(&github, "refs/heads/main"),
            rev(&app.root.join("pub1.git"), "refs/heads/main")
        );

        let (status, _) = send(&app, api("DELETE", "/api/repos/pub1/remote", &admin, "")).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(config_get(&app.root.join("pub1.git"), "remote.github.url").is_none());
        assert!(!app.registry.get("pub1").await.unwrap().remote_configured);
    }

    #[tokio::test]
    async fn api_sync_reports_transport_failure_as_502() {
        let app = test_app();
        let admin = basic("admin", "adminpw");
        let (status, _) = send(
            &app,
            api(
                "PUT",
                "/api/repos/pub1/remote",
                &admin,
                r#"{"url":"/nonexistent/forgegate/remote.git"}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, resp) = send(&app, api("POST", "/api/repos/pub1/sync", &admin, "")).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        let outcome: serde_json::Value = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert!(outcome["push_error"].is_string());
    }

    #[tokio::test]
    async fn api_connect_stores_credential_and_settings() {
        let app = test_app();
        let admin = basic("tok-123", "s3cr3t");
        let (status, resp) = send(
            &app,
            api(
                "POST",
                "/api/repos/priv1/connect",
                &admin,
                r#"{"remote_url":"git@github.com:o/priv1","token":"ghp_x","direction":"both","auto_sync":true}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let repo: serde_json::Value = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(repo["remote_configured"], true);

        let stored = app.registry.get("priv1").await.unwrap();
        assert_eq!(stored.sync_direction, Some(SyncDirection::Both));
        assert!(stored.auto_sync);
        assert!(app
            .state
            .credentials
            .resolve("priv1", None)
            .await
            .unwrap()
            .is_some());

        let (status, _) = send(&app, api("POST", "/api/repos/priv1/disconnect", &admin, "")).await;
        assert_eq!(status, StatusCode::OK);
        let stored = app.registry.get("priv1").await.unwrap();
        assert!(!stored.remote_configured);
        assert!(stored.remote_url.is_none());
        assert!(app
            .state
            .credentials
            .resolve("priv1", None)
            .await
            .unwrap()
            .is_none());
    }

    // -- operational ------------------------------------------------------

    #[tokio::test]
    async fn healthz_and_metrics_are_open() {
        let app = test_app();
        let (status, resp) = send(&app, get("/healthz", None)).await;
        assert_eq!(status, StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        assert_eq!(body["status"], "ok");

        let (status, resp) = send(&app, get("/metrics", None)).await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(body_bytes(resp).await).unwrap();
        assert!(text.contains("forgegate_gateway_decisions"));
    }
}
