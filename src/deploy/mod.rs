/// Deployment lifecycle

pub mod lock;
pub mod orchestrator;
pub mod types;

pub use lock::WorkflowLocks;
pub use orchestrator::{engine_workflow_name, resolve_trigger_url, DeploymentOrchestrator};
pub use types::{DeploymentReceipt, OperationResult, OrphanedResource, TestTriggerReceipt};
