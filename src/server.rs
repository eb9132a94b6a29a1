/// Server setup and initialization
///
/// Wires together storage, the vault, the engine client and the orchestrator, then
/// mounts the HTTP routes.

use crate::{
    api::{create_execution_routes, create_secret_routes, create_workflow_routes, AppState},
    config::Config,
    deploy::DeploymentOrchestrator,
    engine::{EngineClient, HttpEngineClient},
    repository::{Repository, SqliteRepository},
    vault::{SecretManager, VaultService},
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Create the Axum application from configuration
///
/// Opens the database, derives the vault key and connects the engine client.
pub async fn create_app(config: Config) -> Result<Router> {
    ensure_database_dir(&config.database.url)?;

    tracing::info!("📋 Opening database {}", config.database.url);
    let repository: Arc<dyn Repository> = Arc::new(
        SqliteRepository::connect(&config.database.url)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open database: {}", e))?,
    );

    let vault = Arc::new(
        VaultService::from_config(&config.vault)
            .map_err(|e| anyhow::anyhow!("Failed to initialize vault: {}", e))?,
    );

    tracing::info!("🔗 Engine control plane at {}", config.engine.api_url);
    let engine: Arc<dyn EngineClient> = Arc::new(
        HttpEngineClient::from_config(&config.engine)
            .map_err(|e| anyhow::anyhow!("Failed to initialize engine client: {}", e))?,
    );

    build_app(repository, engine, vault, &config)
}

/// Assemble the router from already constructed collaborators
pub fn build_app(
    repository: Arc<dyn Repository>,
    engine: Arc<dyn EngineClient>,
    vault: Arc<VaultService>,
    config: &Config,
) -> Result<Router> {
    let secrets = SecretManager::new(repository.clone(), vault);
    let orchestrator = DeploymentOrchestrator::new(
        repository.clone(),
        engine,
        secrets,
        &config.engine,
        config.deploy.clone(),
    )
    .map_err(|e| anyhow::anyhow!("Failed to initialize orchestrator: {}", e))?;

    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        repository,
    };

    tracing::info!("📡 Creating HTTP router");
    let app = Router::new()
        .route("/healthz", get(health_check))
        .merge(create_workflow_routes())
        .merge(create_execution_routes())
        .merge(create_secret_routes())
        .with_state(state);

    Ok(app)
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting Tessera control plane...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Create the parent directory of a file-backed SQLite URL
fn ensure_database_dir(url: &str) -> Result<()> {
    let Some(path) = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
    else {
        return Ok(());
    };
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() || path.starts_with(":memory:") {
        return Ok(());
    }

    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        tracing::info!("📁 Ensuring database directory exists: {}", parent.display());
        std::fs::create_dir_all(parent)
            .map_err(|e| anyhow::anyhow!("Failed to create database directory: {}", e))?;
    }
    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}
