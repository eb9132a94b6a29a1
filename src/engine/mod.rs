/// External workflow engine: control-plane client and retry combinator

pub mod client;
pub mod retry;

pub use client::{
    EngineClient, EngineWorkflow, EngineWorkflowNode, EngineWorkflowRef, HttpEngineClient,
    TriggerClient,
};
pub use retry::{retry_with, Backoff, RetryPolicy};

use thiserror::Error;

/// A failed call to the engine (or a trigger URL), named after the operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("engine {operation} request failed: {message}")]
    Request { operation: String, message: String },

    #[error("engine {operation} returned HTTP {status}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("engine {operation} response could not be decoded: {message}")]
    Decode { operation: String, message: String },
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn operation(&self) -> &str {
        match self {
            TransportError::Request { operation, .. }
            | TransportError::Status { operation, .. }
            | TransportError::Decode { operation, .. } => operation,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}
