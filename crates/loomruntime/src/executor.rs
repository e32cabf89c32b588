use crate::registry::NodeRegistry;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use loomcore::{
    CredentialStore, Credentials, EventBus, ExecutionEvent, ExecutionId, FlowError, Node,
    NodeContext, NodeId, Value, Workflow, WorkflowError,
};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};

/// Executes workflows as DAGs with bounded parallel execution.
///
/// Pinned nodes are never instantiated: their pinned outputs are published
/// as if the node had run. A failing node whose spec carries
/// `continue_on_fail` gets an error record on its `error` port and the
/// workflow keeps going; otherwise the workflow-level policy applies.
pub struct WorkflowExecutor {
    max_parallel: usize,
}

impl WorkflowExecutor {
    pub fn new(max_parallel: usize) -> Self {
        Self { max_parallel }
    }

    /// Execute a workflow and return results
    pub async fn execute(
        &self,
        workflow: &Workflow,
        registry: &NodeRegistry,
        event_bus: &EventBus,
        credentials: &CredentialStore,
        initial_inputs: HashMap<String, Value>,
    ) -> Result<ExecutionResult, FlowError> {
        let execution_id = ExecutionId::new_v4();
        let start_time = Instant::now();

        event_bus.emit(ExecutionEvent::WorkflowStarted {
            execution_id,
            workflow_id: workflow.id,
            timestamp: Utc::now(),
        });

        tracing::info!(workflow_id = %workflow.id, %execution_id, "starting workflow execution");

        let graph = self.build_graph(workflow)?;

        // Resolve credentials first so a missing entry fails before any
        // node touches an external service.
        let mut node_credentials: HashMap<NodeId, Credentials> = HashMap::new();
        for node_spec in &workflow.nodes {
            if let Some(name) = &node_spec.credential {
                let creds = credentials.get(name).await.ok_or_else(|| {
                    FlowError::Execution(format!(
                        "Node {} requires unknown credential '{}'",
                        node_spec.id, name
                    ))
                })?;
                node_credentials.insert(node_spec.id, creds);
            }
        }

        // Instantiate every non-pinned node
        let mut node_instances = HashMap::new();
        for node_spec in &workflow.nodes {
            if workflow.pin_data.contains_key(&node_spec.id) {
                tracing::debug!(node_id = %node_spec.id, "node is pinned, skipping instantiation");
                continue;
            }

            let mut node = registry.create_node(&node_spec.node_type, &node_spec.config)?;
            if let Err(e) = node.initialize().await {
                tracing::error!(node_id = %node_spec.id, error = %e, "node initialization failed");
                return Err(FlowError::Execution(format!(
                    "Node initialization failed: {}",
                    e
                )));
            }
            node_instances.insert(node_spec.id, node);
        }

        let result = self
            .execute_dag(
                workflow,
                graph,
                node_instances,
                node_credentials,
                event_bus,
                execution_id,
                initial_inputs,
            )
            .await;

        let duration_ms = start_time.elapsed().as_millis() as u64;
        event_bus.emit(ExecutionEvent::WorkflowCompleted {
            execution_id,
            success: result.is_ok(),
            duration_ms,
            timestamp: Utc::now(),
        });

        result
    }

    /// Build a dependency graph from the workflow, rejecting cycles
    fn build_graph(&self, workflow: &Workflow) -> Result<DiGraph<NodeId, ()>, WorkflowError> {
        let mut graph = DiGraph::new();
        let mut node_to_index = HashMap::new();

        for node_spec in &workflow.nodes {
            let idx = graph.add_node(node_spec.id);
            node_to_index.insert(node_spec.id, idx);
        }

        for conn in &workflow.connections {
            let from_idx = node_to_index
                .get(&conn.from_node)
                .ok_or_else(|| WorkflowError::NodeNotFound(conn.from_node.to_string()))?;
            let to_idx = node_to_index
                .get(&conn.to_node)
                .ok_or_else(|| WorkflowError::NodeNotFound(conn.to_node.to_string()))?;

            graph.add_edge(*from_idx, *to_idx, ());
        }

        if toposort(&graph, None).is_err() {
            return Err(WorkflowError::CyclicDependency);
        }

        Ok(graph)
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_dag(
        &self,
        workflow: &Workflow,
        graph: DiGraph<NodeId, ()>,
        mut node_instances: HashMap<NodeId, Box<dyn Node>>,
        node_credentials: HashMap<NodeId, Credentials>,
        event_bus: &EventBus,
        execution_id: ExecutionId,
        initial_inputs: HashMap<String, Value>,
    ) -> Result<ExecutionResult, FlowError> {
        let mut completed = HashSet::new();
        let mut failed = HashSet::new();
        let mut in_flight: HashSet<NodeId> = HashSet::new();
        let mut node_outputs: HashMap<NodeId, HashMap<String, Value>> = HashMap::new();
        let mut running = FuturesUnordered::new();
        let node_to_index: HashMap<NodeId, NodeIndex> = graph
            .node_indices()
            .filter_map(|idx| graph.node_weight(idx).map(|id| (*id, idx)))
            .collect();

        // Initial inputs feed nodes without predecessors, keyed by nil id
        if !initial_inputs.is_empty() {
            node_outputs.insert(NodeId::nil(), initial_inputs);
        }

        loop {
            let ready_nodes = self.find_ready_nodes(&graph, &node_to_index, &completed, &in_flight);
            let mut pinned_progress = false;

            for node_id in ready_nodes {
                // Pinned node: publish its fixed outputs without running anything
                if let Some(pinned) = workflow.pin_data.get(&node_id) {
                    tracing::info!(%node_id, "using pinned data");

                    event_bus.emit(ExecutionEvent::NodeCompleted {
                        execution_id,
                        node_id,
                        outputs: pinned.clone(),
                        duration_ms: 0,
                        pinned: true,
                        timestamp: Utc::now(),
                    });

                    node_outputs.insert(node_id, pinned.clone());
                    completed.insert(node_id);
                    pinned_progress = true;
                    continue;
                }

                if running.len() >= self.max_parallel {
                    break;
                }

                let node_spec = workflow
                    .find_node(node_id)
                    .ok_or_else(|| WorkflowError::NodeNotFound(node_id.to_string()))?;

                let node = node_instances
                    .remove(&node_id)
                    .ok_or_else(|| WorkflowError::NodeNotFound(node_id.to_string()))?;
                in_flight.insert(node_id);

                let inputs = self.collect_node_inputs(node_id, workflow, &node_outputs);

                let ctx = NodeContext {
                    node_id,
                    inputs,
                    config: node_spec.config.clone(),
                    credentials: node_credentials.get(&node_id).cloned().unwrap_or_default(),
                    continue_on_fail: node_spec.continue_on_fail,
                    state: Arc::new(tokio::sync::RwLock::new(loomcore::NodeState::default())),
                    events: event_bus.create_emitter(execution_id, node_id),
                    cancellation: tokio_util::sync::CancellationToken::new(),
                };

                event_bus.emit(ExecutionEvent::NodeStarted {
                    execution_id,
                    node_id,
                    node_type: node_spec.node_type.clone(),
                    timestamp: Utc::now(),
                });

                let task = async move {
                    let start = Instant::now();
                    let result = node.execute(ctx).await;
                    let duration_ms = start.elapsed().as_millis() as u64;
                    (node_id, result, duration_ms)
                };

                if let Some(timeout_ms) = workflow.settings.max_execution_time_ms {
                    let duration = Duration::from_millis(timeout_ms);
                    let task_with_timeout = async move {
                        match timeout(duration, task).await {
                            Ok(result) => result,
                            Err(_) => (
                                node_id,
                                Err(loomcore::NodeError::Timeout {
                                    seconds: timeout_ms / 1000,
                                }),
                                timeout_ms,
                            ),
                        }
                    };
                    running.push(tokio::spawn(task_with_timeout));
                } else {
                    running.push(tokio::spawn(task));
                }
            }

            // Pinned completions may have unblocked more nodes
            if pinned_progress {
                continue;
            }

            if running.is_empty() {
                break;
            }

            if let Some(result) = running.next().await {
                let (node_id, exec_result, duration_ms) = result
                    .map_err(|e| FlowError::Execution(format!("Task join error: {}", e)))?;
                in_flight.remove(&node_id);

                match exec_result {
                    Ok(output) => {
                        tracing::info!(%node_id, duration_ms, "node completed");

                        event_bus.emit(ExecutionEvent::NodeCompleted {
                            execution_id,
                            node_id,
                            outputs: output.outputs.clone(),
                            duration_ms,
                            pinned: false,
                            timestamp: Utc::now(),
                        });

                        node_outputs.insert(node_id, output.outputs);
                        completed.insert(node_id);
                    }
                    Err(e) => {
                        let continue_on_fail = workflow
                            .find_node(node_id)
                            .map(|spec| spec.continue_on_fail)
                            .unwrap_or(false);

                        tracing::error!(%node_id, error = %e, continue_on_fail, "node failed");

                        event_bus.emit(ExecutionEvent::NodeFailed {
                            execution_id,
                            node_id,
                            error: e.to_string(),
                            continued: continue_on_fail,
                            timestamp: Utc::now(),
                        });

                        if continue_on_fail {
                            // Record the failure on the error port and keep going
                            let mut outputs = HashMap::new();
                            outputs.insert("error".to_string(), Value::String(e.to_string()));
                            node_outputs.insert(node_id, outputs);
                            completed.insert(node_id);
                            failed.insert(node_id);
                            continue;
                        }

                        match workflow.settings.on_error {
                            loomcore::ErrorHandling::StopWorkflow => {
                                return Err(FlowError::Execution(format!(
                                    "Node {} failed: {}",
                                    node_id, e
                                )));
                            }
                            loomcore::ErrorHandling::ContinueOnError => {
                                completed.insert(node_id);
                                failed.insert(node_id);
                            }
                            loomcore::ErrorHandling::RetryWorkflow { .. } => {
                                // Retry-at-workflow-level is handled by callers;
                                // from inside a single run it is a failure.
                                return Err(FlowError::Execution(format!(
                                    "Node {} failed: {}",
                                    node_id, e
                                )));
                            }
                        }
                    }
                }
            }
        }

        Ok(ExecutionResult {
            execution_id,
            outputs: node_outputs,
            completed_nodes: completed.len() - failed.len(),
            failed_nodes: failed.len(),
            total_nodes: workflow.nodes.len(),
        })
    }

    /// Find nodes whose dependencies are met and that are not already
    /// completed or in flight
    fn find_ready_nodes(
        &self,
        graph: &DiGraph<NodeId, ()>,
        node_to_index: &HashMap<NodeId, NodeIndex>,
        completed: &HashSet<NodeId>,
        in_flight: &HashSet<NodeId>,
    ) -> Vec<NodeId> {
        let mut ready = Vec::new();

        for (node_id, idx) in node_to_index {
            if completed.contains(node_id) || in_flight.contains(node_id) {
                continue;
            }

            let dependencies_met = graph
                .neighbors_directed(*idx, petgraph::Direction::Incoming)
                .all(|dep_idx| {
                    graph
                        .node_weight(dep_idx)
                        .map(|dep_id| completed.contains(dep_id))
                        .unwrap_or(false)
                });

            if dependencies_met {
                ready.push(*node_id);
            }
        }

        ready
    }

    /// Collect inputs for a node from its predecessors' published outputs
    fn collect_node_inputs(
        &self,
        node_id: NodeId,
        workflow: &Workflow,
        node_outputs: &HashMap<NodeId, HashMap<String, Value>>,
    ) -> HashMap<String, Value> {
        let mut inputs = HashMap::new();

        let has_predecessors = workflow
            .connections
            .iter()
            .any(|conn| conn.to_node == node_id);

        // Source nodes receive the initial inputs
        if !has_predecessors {
            if let Some(initial_inputs) = node_outputs.get(&NodeId::nil()) {
                inputs.extend(initial_inputs.clone());
            }
        }

        for conn in &workflow.connections {
            if conn.to_node == node_id {
                if let Some(outputs) = node_outputs.get(&conn.from_node) {
                    if let Some(value) = outputs.get(&conn.from_port) {
                        inputs.insert(conn.to_port.clone(), value.clone());
                    }
                }
            }
        }

        inputs
    }
}

/// Result of workflow execution
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub execution_id: ExecutionId,
    pub outputs: HashMap<NodeId, HashMap<String, Value>>,
    /// Nodes that completed successfully (including pinned nodes)
    pub completed_nodes: usize,
    /// Nodes that failed but were recorded and skipped
    pub failed_nodes: usize,
    pub total_nodes: usize,
}
