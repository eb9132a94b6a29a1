/// HTTP API layer
///
/// Thin handlers over the orchestrator. Orchestrator results are returned as
/// `{success, data?, error?}` with 200; unknown users and malformed bodies are 4xx.
/// The acting user comes from the `x-tessera-user` header, resolved against the
/// members table populated by the external identity sync.

// Workflow authoring and lifecycle endpoints
pub mod workflows;

// Execution callback posted by the engine
pub mod executions;

// Organization secret management
pub mod secrets;

pub use executions::create_execution_routes;
pub use secrets::create_secret_routes;
pub use workflows::create_workflow_routes;

use crate::deploy::DeploymentOrchestrator;
use crate::organization::ActingUser;
use crate::repository::Repository;
use axum::http::{HeaderMap, StatusCode};
use std::sync::Arc;

/// Header carrying the identity-provider user id
pub const USER_HEADER: &str = "x-tessera-user";

/// Shared state for every route
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<DeploymentOrchestrator>,
    pub repository: Arc<dyn Repository>,
}

/// Resolve the acting user from the request headers
pub async fn acting_user(state: &AppState, headers: &HeaderMap) -> Result<ActingUser, StatusCode> {
    let user_id = headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    match state.repository.get_member(user_id).await {
        Ok(Some(member)) => Ok(ActingUser::from(&member)),
        Ok(None) => {
            tracing::debug!("Unknown user {} rejected", user_id);
            Err(StatusCode::UNAUTHORIZED)
        }
        Err(e) => {
            tracing::error!("Failed to resolve user {}: {}", user_id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
