//! Core abstractions for the loom workflow engine
//!
//! This crate provides the fundamental types and traits that all other
//! components depend on: the dynamic value model, the node trait, the
//! workflow graph definition, credentials, and execution events.

mod credentials;
mod error;
pub mod events;
mod node;
mod value;
mod workflow;

pub use credentials::{CredentialStore, Credentials};
pub use error::{FlowError, NodeError, WorkflowError};
pub use events::{EventBus, EventEmitter, ExecutionEvent, ExecutionId, NodeEvent};
pub use node::{Node, NodeContext, NodeMetadata, NodeOutput, NodeState};
pub use value::Value;
pub use workflow::{
    Connection, ErrorHandling, NodeId, NodeSpec, PinData, Position, RetryPolicy, TriggerSpec,
    TriggerType, Workflow, WorkflowId, WorkflowSettings,
};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
