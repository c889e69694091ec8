mod auth;
mod config;
mod credentials;
mod domain;
mod error;
mod forge;
mod git;
mod health;
mod http;
mod keydb;
mod metrics;
mod notify;
mod registry;
mod sync;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use fred::clients::Pool;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::auth::{AccessGate, Authenticator};
use crate::config::Config;
use crate::credentials::{
    CredentialResolver, CredentialStore, FallbackCredentialStore, KeyDbCredentialStore,
};
use crate::forge::{ForgeBackend, GitHubBackend};
use crate::git::{BareRepos, Git};
use crate::metrics::MetricsRegistry;
use crate::notify::{build_notifier, WorkspaceNotifier};
use crate::registry::{KeyDbRegistry, KeyDbUserStore, RepositoryRegistry, UserStore};
use crate::sync::{AutoSyncScheduler, RemoteLifecycle, StatusResolver, SyncEngine};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "forgegate", about = "Git smart-HTTP gateway with GitHub sync")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "/etc/forgegate/config.yaml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// Global state shared across all request handlers and background tasks.
pub struct AppState {
    pub config: Arc<Config>,
    /// `None` only in tests, which run against in-memory stores.
    pub keydb: Option<Pool>,
    pub gate: AccessGate,
    pub registry: Arc<dyn RepositoryRegistry>,
    pub credentials: CredentialResolver,
    pub engine: Arc<SyncEngine>,
    pub lifecycle: RemoteLifecycle,
    pub git: Git,
    pub repos: BareRepos,
    pub notifier: Arc<dyn WorkspaceNotifier>,
    pub metrics: MetricsRegistry,
}

/// Backing services an [`AppState`] is assembled from.
pub struct Backends {
    pub keydb: Option<Pool>,
    pub registry: Arc<dyn RepositoryRegistry>,
    pub users: Arc<dyn UserStore>,
    pub credential_store: Arc<dyn CredentialStore>,
    pub forge: Arc<dyn ForgeBackend>,
    pub notifier: Arc<dyn WorkspaceNotifier>,
}

impl AppState {
    pub fn new(config: Arc<Config>, backends: Backends) -> Self {
        let metrics = MetricsRegistry::new();
        let git = Git::new(&config.git.binary, config.git.command_timeout());
        let repos = BareRepos::new(&config.storage.repos_path);
        let credentials = CredentialResolver::new(backends.credential_store);

        let resolver = StatusResolver::new(
            git.with_timeout(config.git.status_timeout()),
            repos.clone(),
            &config.sync,
            metrics.metrics.clone(),
        );
        let engine = Arc::new(SyncEngine::new(
            git.clone(),
            repos.clone(),
            backends.registry.clone(),
            config.sync.clone(),
            resolver,
            metrics.metrics.clone(),
        ));
        let lifecycle = RemoteLifecycle::new(engine.clone(), credentials.clone(), backends.forge);
        let gate = AccessGate::new(
            Authenticator::new(backends.users),
            backends.registry.clone(),
        );

        Self {
            config,
            keydb: backends.keydb,
            gate,
            registry: backends.registry,
            credentials,
            engine,
            lifecycle,
            git,
            repos,
            notifier: backends.notifier,
            metrics,
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP server (axum)
// ---------------------------------------------------------------------------

async fn run_http_server(state: Arc<AppState>) -> Result<()> {
    let app = http::create_router(Arc::clone(&state));

    let listen_addr: std::net::SocketAddr = state
        .config
        .server
        .http_listen
        .parse()
        .context("invalid http_listen address")?;

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {listen_addr}"))?;

    tracing::info!(%listen_addr, mount_prefix = %state.config.server.mount_prefix, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // ---- CLI ----
    let cli = Cli::parse();

    // ---- Config ----
    let config = Arc::new(config::load_config(&cli.config)?);

    // ---- Tracing ----
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!(config_path = %cli.config, "starting forgegate");

    // ---- Repository root ----
    tokio::fs::create_dir_all(&config.storage.repos_path)
        .await
        .with_context(|| {
            format!(
                "failed to create repository root: {}",
                config.storage.repos_path.display()
            )
        })?;

    // ---- Infrastructure clients ----
    let pool = keydb::create_pool(&config.keydb).await?;
    let prefix = config.keydb.key_prefix.clone();

    let http_client = reqwest::Client::builder()
        .user_agent(concat!("forgegate/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build reqwest client")?;

    let credential_store: Arc<dyn CredentialStore> = Arc::new(FallbackCredentialStore::new(
        Arc::new(KeyDbCredentialStore::new(pool.clone(), prefix.clone())),
    ));

    let backends = Backends {
        keydb: Some(pool.clone()),
        registry: Arc::new(KeyDbRegistry::new(pool.clone(), prefix.clone())),
        users: Arc::new(KeyDbUserStore::new(pool, prefix)),
        credential_store,
        forge: Arc::new(GitHubBackend::new(&config.github, http_client.clone())),
        notifier: build_notifier(&config.notify, http_client),
    };
    let state = Arc::new(AppState::new(Arc::clone(&config), backends));

    // ---- Auto-sync ----
    let shutdown = CancellationToken::new();
    let scheduler_handle = if config.sync.auto_sync_interval_secs > 0 {
        let scheduler = AutoSyncScheduler::new(
            state.engine.clone(),
            state.registry.clone(),
            state.credentials.clone(),
            Duration::from_secs(config.sync.auto_sync_interval_secs),
        );
        Some(tokio::spawn(scheduler.run(shutdown.clone())))
    } else {
        tracing::info!("auto-sync disabled");
        None
    };

    // ---- Serve until signalled ----
    let result = run_http_server(state).await;
    shutdown.cancel();
    if let Some(handle) = scheduler_handle {
        let _ = handle.await;
    }
    if let Err(e) = &result {
        tracing::error!(error = %format!("{e:#}"), "HTTP server failed");
    }

    tracing::info!("forgegate shut down cleanly");
    result
}
