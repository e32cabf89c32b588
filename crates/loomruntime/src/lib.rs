//! Workflow execution runtime
//!
//! This crate provides the execution engine that runs workflows as DAGs,
//! manages the node-type registry, resolves credentials and pinned data,
//! and enforces per-node continue-on-fail semantics.

mod executor;
mod registry;
mod runtime;

pub use executor::{ExecutionResult, WorkflowExecutor};
pub use registry::{NodeFactory, NodeRegistry, NodeTypeInfo, PortDefinition};
pub use runtime::{FlowRuntime, RuntimeConfig};
