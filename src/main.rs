/// Tessera control plane entry point
///
/// Loads configuration from the environment and starts the HTTP server:
/// - Workflow authoring and lifecycle at /api/workflows/*
/// - Engine execution callbacks at /api/executions/{deployment_id}
/// - Secret management at /api/secrets
/// - Health check at /healthz

use tessera::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
