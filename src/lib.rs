/// Tessera: control plane for declarative automation pipelines
///
/// Compiles typed trigger/action specifications into an external workflow engine's
/// schema and drives the deploy lifecycle against the engine's HTTP control plane,
/// with an authenticated-encryption vault for secret parameters and an append-only
/// audit trail.

// Core configuration and error taxonomy
pub mod config;
pub mod error;

// Specification model, validator and blueprints
pub mod workflow;

// Specification -> engine graph compiler
pub mod compiler;

// Secret encryption and storage
pub mod vault;

// Role x plan decisions
pub mod entitlement;

// Tenants and members
pub mod organization;

// Append-only audit log
pub mod audit;

// Persistence contract and SQLite implementation
pub mod repository;

// Engine control-plane client and retry combinator
pub mod engine;

// Deployment lifecycle orchestration
pub mod deploy;

// HTTP API layer
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use compiler::{CompiledEngineGraph, EngineCompiler};
pub use deploy::{DeploymentOrchestrator, OperationResult};
pub use error::{Result, TesseraError};
pub use server::start_server;
pub use vault::VaultService;
pub use workflow::{WorkflowNode, WorkflowSpecification};
