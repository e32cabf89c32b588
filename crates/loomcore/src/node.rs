use crate::{events::EventEmitter, Credentials, NodeError, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub type NodeId = Uuid;

/// Core trait that all executable nodes implement
#[async_trait]
pub trait Node: Send + Sync {
    /// Unique type identifier (e.g., "http.request", "postgres.insert")
    fn node_type(&self) -> &str;

    /// Execute the node with given context
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError>;

    /// Optional: Initialize stateful resources (DB connections, etc.)
    async fn initialize(&mut self) -> Result<(), NodeError> {
        Ok(())
    }

    /// Optional: Cleanup resources
    async fn shutdown(&mut self) -> Result<(), NodeError> {
        Ok(())
    }

    /// Optional: Validate configuration at workflow load time
    fn validate_config(&self, _config: &HashMap<String, Value>) -> Result<(), NodeError> {
        Ok(())
    }
}

/// Execution context passed to each node
#[derive(Clone)]
pub struct NodeContext {
    /// Unique node instance ID
    pub node_id: NodeId,

    /// Input values from connected nodes
    pub inputs: HashMap<String, Value>,

    /// Static configuration for this node
    pub config: HashMap<String, Value>,

    /// Credentials resolved for this node from the credential store
    pub credentials: Credentials,

    /// Mirrors the node spec's continue_on_fail flag so nodes that process
    /// item batches can decide whether to record-and-skip item failures
    pub continue_on_fail: bool,

    /// Persistent state (survives across executions in same workflow run)
    pub state: Arc<RwLock<NodeState>>,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    /// Cancellation token for graceful shutdown
    pub cancellation: tokio_util::sync::CancellationToken,
}

impl NodeContext {
    pub fn new(node_id: NodeId, events: EventEmitter) -> Self {
        Self {
            node_id,
            inputs: HashMap::new(),
            config: HashMap::new(),
            credentials: Credentials::new(),
            continue_on_fail: false,
            state: Arc::new(RwLock::new(NodeState::default())),
            events,
            cancellation: tokio_util::sync::CancellationToken::new(),
        }
    }

    /// Get required input or return error
    pub fn require_input(&self, name: &str) -> Result<&Value, NodeError> {
        self.inputs
            .get(name)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    /// Get required string input, rejecting non-string values
    pub fn require_str_input(&self, name: &str) -> Result<&str, NodeError> {
        self.require_input(name)?
            .as_str()
            .ok_or_else(|| NodeError::InvalidInputType {
                field: name.to_string(),
                expected: "string".to_string(),
                actual: "other".to_string(),
            })
    }

    /// Get config value or return error
    pub fn require_config(&self, name: &str) -> Result<&Value, NodeError> {
        self.config
            .get(name)
            .ok_or_else(|| NodeError::Configuration(format!("Missing config: {}", name)))
    }

    /// Get required string config value
    pub fn require_str_config(&self, name: &str) -> Result<&str, NodeError> {
        self.require_config(name)?
            .as_str()
            .ok_or_else(|| NodeError::Configuration(format!("Config '{}' must be a string", name)))
    }

    /// Get config with default
    pub fn get_config_or(&self, name: &str, default: Value) -> Value {
        self.config.get(name).cloned().unwrap_or(default)
    }

    /// Get a named secret from the resolved credentials
    pub fn require_credential(&self, key: &str) -> Result<&str, NodeError> {
        self.credentials
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| NodeError::MissingCredential(key.to_string()))
    }
}

/// Persistent state for a node instance
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct NodeState {
    pub data: HashMap<String, Value>,
}

/// Output from node execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeOutput {
    /// Output port values
    pub outputs: HashMap<String, Value>,

    /// Execution metadata
    pub metadata: NodeMetadata,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self {
            outputs: HashMap::new(),
            metadata: NodeMetadata::default(),
        }
    }

    pub fn with_output(mut self, port: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(port.into(), value.into());
        self
    }
}

impl Default for NodeOutput {
    fn default() -> Self {
        Self::new()
    }
}

/// Metadata about node execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub execution_time_ms: u64,
    pub items_processed: Option<usize>,
    pub custom: HashMap<String, Value>,
}
