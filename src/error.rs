/// Error taxonomy shared by every component of the control plane.
///
/// Library code returns [`TesseraError`]; the orchestrator converts it into an
/// [`OperationResult`](crate::deploy::OperationResult) at its API boundary so that
/// failures travel as data rather than control flow.

use crate::engine::TransportError;
use crate::entitlement::Denial;
use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, TesseraError>;

#[derive(Debug, Error)]
pub enum TesseraError {
    /// Malformed specification, raised only by the pre-compile checker.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Role or plan denial, or a capability the acting user lacks.
    #[error("permission denied: {0}")]
    Permission(String),

    /// Vault nonce/tag length mismatch or failed authentication.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// External engine call failed after retries were exhausted.
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<Denial> for TesseraError {
    fn from(denial: Denial) -> Self {
        TesseraError::Permission(denial.to_string())
    }
}

impl TesseraError {
    /// Short machine-readable category, used in logs and API payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            TesseraError::Validation(_) => "validation",
            TesseraError::Permission(_) => "permission",
            TesseraError::Integrity(_) => "integrity",
            TesseraError::Transport(_) => "transport",
            TesseraError::NotFound(_) => "not_found",
            TesseraError::Conflict(_) => "conflict",
            TesseraError::Storage(_) => "storage",
            TesseraError::Serialization(_) => "serialization",
            TesseraError::Config(_) => "config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitlement::{Denial, PlanStatus, Role};

    #[test]
    fn test_plan_denial_message_mentions_plan() {
        let err: TesseraError = Denial::Plan(PlanStatus::Canceled).into();
        assert_eq!(err.kind(), "permission");
        assert!(err.to_string().contains("plan"));
    }

    #[test]
    fn test_role_denial_message_mentions_role() {
        let err: TesseraError = Denial::Role(Role::Viewer).into();
        assert!(err.to_string().contains("role"));
    }

    #[test]
    fn test_transport_error_is_transparent() {
        let err: TesseraError = TransportError::Status {
            operation: "create".to_string(),
            status: 502,
            body: "bad gateway".to_string(),
        }
        .into();
        assert_eq!(err.kind(), "transport");
        assert!(err.to_string().contains("502"));
    }
}
