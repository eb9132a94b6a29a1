/// Specification layer
///
/// Typed shapes of the declarative automation specification, the pre-compile
/// structural validator, and the built-in blueprints.

// Core specification type definitions
pub mod types;

// Structural checks run before compilation
pub mod validator;

// Blueprint specifications for new drafts
pub mod templates;

// Re-export commonly used types
pub use types::{
    ActionTarget, HttpMethod, NodeData, NodeKind, ParameterDeclaration, ParameterKind, Position,
    SpecMetadata, TriggerSource, WorkflowEdge, WorkflowNode, WorkflowSpecification,
};
pub use validator::{validate_for_deploy, validate_structure, ValidationReport};
