/// Organization secret endpoints. Plaintext goes in, never comes out.

use crate::api::{acting_user, AppState};
use crate::deploy::OperationResult;
use crate::entitlement::{can_perform, Capability};
use crate::error::TesseraError;
use crate::vault::SecretSummary;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{delete, post},
    Router,
};
use serde::Deserialize;

#[derive(Deserialize)]
pub struct StoreSecretRequest {
    pub key: String,
    pub value: String,
    /// Replace an existing key instead of failing
    #[serde(default)]
    pub replace: bool,
}

pub fn create_secret_routes() -> Router<AppState> {
    Router::new()
        .route("/api/secrets", post(store_secret).get(list_secrets))
        .route("/api/secrets/{key}", delete(delete_secret))
}

fn forbidden<T>(role: impl std::fmt::Display) -> OperationResult<T> {
    OperationResult::failure(
        TesseraError::Permission(format!("role '{}' is not permitted to manage secrets", role))
            .to_string(),
    )
}

/// POST /api/secrets
async fn store_secret(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<StoreSecretRequest>,
) -> Result<Json<OperationResult<SecretSummary>>, StatusCode> {
    let actor = acting_user(&state, &headers).await?;
    if !can_perform(actor.role, Capability::Edit) {
        return Ok(Json(forbidden(actor.role)));
    }

    let secrets = state.orchestrator.secrets();
    let result = if payload.replace {
        secrets
            .replace(&actor.organization_id, &payload.key, &payload.value)
            .await
    } else {
        secrets
            .store(&actor.organization_id, &payload.key, &payload.value)
            .await
    };
    Ok(Json(OperationResult::from_result(result)))
}

/// GET /api/secrets
async fn list_secrets(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<OperationResult<Vec<SecretSummary>>>, StatusCode> {
    let actor = acting_user(&state, &headers).await?;
    let result = state.orchestrator.secrets().list(&actor.organization_id).await;
    Ok(Json(OperationResult::from_result(result)))
}

/// DELETE /api/secrets/{key}
async fn delete_secret(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<Json<OperationResult<bool>>, StatusCode> {
    let actor = acting_user(&state, &headers).await?;
    if !can_perform(actor.role, Capability::Edit) {
        return Ok(Json(forbidden(actor.role)));
    }

    let result = state
        .orchestrator
        .secrets()
        .delete(&actor.organization_id, &key)
        .await;
    Ok(Json(OperationResult::from_result(result)))
}
