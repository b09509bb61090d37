// ABOUTME: Server bootstrap: configuration, database, compute backend and HTTP listener
// ABOUTME: Also hosts the one-shot maintenance operations used by the devbox binary

use anyhow::{Context, Result};
use axum::http::{HeaderValue, Method};
use sqlx::SqlitePool;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use devbox_api::{create_router, AppState};
use devbox_sandbox::{
    reaper, ComputeBackend, DockerBackend, HttpBackend, PurgeStats, SandboxManager, SandboxStore,
    SqliteSandboxStore,
};

pub mod config;


use config::{BackendKind, Config};

/// Extra time HTTP backend calls get beyond the sandbox timeouts
const BACKEND_REQUEST_SLACK: Duration = Duration::from_secs(30);

/// Install the global tracing subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,devbox_sandbox=debug,devbox_api=debug"));

    // A second call (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Open the configured database and bring its schema up to date
pub async fn open_database(config: &Config) -> Result<SqlitePool> {
    let database_url = match &config.database_url {
        Some(url) => url.clone(),
        None => devbox_storage::default_database_url()?,
    };

    let pool = devbox_storage::connect_and_migrate(&database_url)
        .await
        .with_context(|| format!("Failed to open database {}", database_url))?;
    Ok(pool)
}

/// Per-request timeout for the HTTP backend. It must outlast both the
/// provisioning and command timeouts so those fire first and record their
/// own outcome.
pub fn backend_request_timeout(config: &Config) -> Duration {
    config.provision_timeout.max(config.command_timeout) + BACKEND_REQUEST_SLACK
}

/// Construct the compute backend selected by `DEVBOX_BACKEND`
pub fn build_backend(config: &Config) -> Result<Arc<dyn ComputeBackend>> {
    let backend: Arc<dyn ComputeBackend> = match config.backend {
        BackendKind::Docker => Arc::new(
            DockerBackend::new(config.public_host.clone())
                .context("Failed to connect to the Docker daemon")?,
        ),
        BackendKind::Http => {
            let base_url = config
                .backend_url
                .as_deref()
                .ok_or(config::ConfigError::MissingBackendUrl)?;
            Arc::new(
                HttpBackend::new(
                    base_url,
                    config.backend_token.clone(),
                    backend_request_timeout(config),
                )
                .context("Failed to configure the HTTP backend")?,
            )
        }
    };
    Ok(backend)
}

pub async fn run_server(config: Config) -> Result<()> {
    let pool = open_database(&config).await?;
    let store: Arc<dyn SandboxStore> = Arc::new(SqliteSandboxStore::new(pool));

    // Nothing of this process owns in-flight rows yet
    reaper::recover_interrupted(store.as_ref()).await?;

    let settings = config.sandbox_settings();
    if let Some(retention) = settings.retention {
        reaper::spawn(Arc::clone(&store), retention, settings.reaper_interval);
        info!(
            retention_secs = retention.as_secs(),
            "Reaper enabled for terminal sandboxes"
        );
    }

    let backend = build_backend(&config)?;
    match backend.is_available().await {
        Ok(true) => info!(backend = backend.name(), "Compute backend available"),
        Ok(false) | Err(_) => warn!(
            backend = backend.name(),
            "Compute backend is not reachable; sandboxes will fail to provision until it is"
        ),
    }

    let manager = Arc::new(SandboxManager::new(store, backend, settings));

    // Create CORS layer
    let cors = CorsLayer::new()
        .allow_origin(
            config
                .cors_origin
                .parse::<HeaderValue>()
                .context("Invalid CORS_ORIGIN")?,
        )
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let app = create_router(AppState::new(manager)).layer(cors);

    let ip = config
        .host
        .parse()
        .with_context(|| format!("Invalid DEVBOX_HOST: {}", config.host))?;
    let addr = SocketAddr::new(ip, config.port);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Apply migrations and exit
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = open_database(config).await?;
    pool.close().await;
    Ok(())
}

/// One reaper pass with the given retention
pub async fn purge(config: &Config, older_than: Duration) -> Result<PurgeStats> {
    let pool = open_database(config).await?;
    let store = SqliteSandboxStore::new(pool.clone());
    let stats = reaper::purge_once(&store, older_than).await?;
    pool.close().await;
    Ok(stats)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
