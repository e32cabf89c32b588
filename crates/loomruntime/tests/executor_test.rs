// crates/loomruntime/tests/executor_test.rs
//
// Engine-level tests: DAG scheduling, pinned data, continue-on-fail,
// credential resolution, cycle detection.

use async_trait::async_trait;
use loomcore::{
    Credentials, FlowError, Node, NodeContext, NodeError, NodeOutput, NodeSpec, Value, Workflow,
    WorkflowError,
};
use loomruntime::{FlowRuntime, NodeFactory, NodeRegistry, RuntimeConfig};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Passes its inputs straight through, counting invocations
struct PassthroughNode {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Node for PassthroughNode {
    fn node_type(&self) -> &str {
        "test.passthrough"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(NodeOutput {
            outputs: ctx.inputs.clone(),
            metadata: Default::default(),
        })
    }
}

struct PassthroughFactory {
    calls: Arc<AtomicUsize>,
}

impl NodeFactory for PassthroughFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(PassthroughNode {
            calls: self.calls.clone(),
        }))
    }

    fn node_type(&self) -> &str {
        "test.passthrough"
    }
}

/// Passes through after a short sleep, to keep branches in flight together
struct SlowPassthroughNode {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Node for SlowPassthroughNode {
    fn node_type(&self) -> &str {
        "test.slow"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        Ok(NodeOutput {
            outputs: ctx.inputs.clone(),
            metadata: Default::default(),
        })
    }
}

struct SlowPassthroughFactory {
    calls: Arc<AtomicUsize>,
}

impl NodeFactory for SlowPassthroughFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(SlowPassthroughNode {
            calls: self.calls.clone(),
        }))
    }

    fn node_type(&self) -> &str {
        "test.slow"
    }
}

/// Always fails
struct FailingNode;

#[async_trait]
impl Node for FailingNode {
    fn node_type(&self) -> &str {
        "test.fail"
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        Err(NodeError::ExecutionFailed("boom".to_string()))
    }
}

struct FailingFactory;

impl NodeFactory for FailingFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(FailingNode))
    }

    fn node_type(&self) -> &str {
        "test.fail"
    }
}

/// Emits a configured credential value so tests can observe resolution
struct CredentialEchoNode;

#[async_trait]
impl Node for CredentialEchoNode {
    fn node_type(&self) -> &str {
        "test.cred_echo"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let key = ctx.require_credential("api_key")?;
        Ok(NodeOutput::new().with_output("key", key.to_string()))
    }
}

struct CredentialEchoFactory;

impl NodeFactory for CredentialEchoFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(CredentialEchoNode))
    }

    fn node_type(&self) -> &str {
        "test.cred_echo"
    }
}

fn runtime_with(calls: &Arc<AtomicUsize>) -> FlowRuntime {
    let mut registry = NodeRegistry::new();
    registry.register(Arc::new(PassthroughFactory {
        calls: calls.clone(),
    }));
    registry.register(Arc::new(SlowPassthroughFactory {
        calls: calls.clone(),
    }));
    registry.register(Arc::new(FailingFactory));
    registry.register(Arc::new(CredentialEchoFactory));
    FlowRuntime::with_registry(Arc::new(registry), RuntimeConfig::default())
}

fn inputs(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[tokio::test]
async fn linear_workflow_passes_data_downstream() {
    let calls = Arc::new(AtomicUsize::new(0));
    let runtime = runtime_with(&calls);

    let mut wf = Workflow::new("linear");
    let a = wf.add_node(NodeSpec::new("test.passthrough"));
    let b = wf.add_node(NodeSpec::new("test.passthrough"));
    wf.connect(a, "message", b, "message");

    let result = runtime
        .execute(&wf, inputs(&[("message", Value::String("hi".into()))]))
        .await
        .unwrap();

    assert_eq!(result.completed_nodes, 2);
    assert_eq!(result.failed_nodes, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        result.outputs.get(&b).unwrap().get("message").unwrap(),
        &Value::String("hi".into())
    );
}

#[tokio::test]
async fn pinned_node_is_never_executed() {
    let calls = Arc::new(AtomicUsize::new(0));
    let runtime = runtime_with(&calls);

    let mut wf = Workflow::new("pinned");
    // The pinned node would fail if it ever actually ran
    let source = wf.add_node(NodeSpec::new("test.fail"));
    let sink = wf.add_node(NodeSpec::new("test.passthrough"));
    wf.connect(source, "body", sink, "body");

    let mut pinned = HashMap::new();
    pinned.insert("body".to_string(), Value::String("sample".to_string()));
    wf.pin_node(source, pinned);

    let result = runtime.execute(&wf, HashMap::new()).await.unwrap();

    assert_eq!(result.completed_nodes, 2);
    assert_eq!(
        result.outputs.get(&sink).unwrap().get("body").unwrap(),
        &Value::String("sample".into())
    );
    // Only the sink actually ran
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn continue_on_fail_records_error_and_keeps_going() {
    let calls = Arc::new(AtomicUsize::new(0));
    let runtime = runtime_with(&calls);

    let mut wf = Workflow::new("cof");
    let bad = wf.add_node(NodeSpec::new("test.fail").continue_on_fail());
    let after = wf.add_node(NodeSpec::new("test.passthrough"));
    wf.connect(bad, "error", after, "upstream_error");

    let result = runtime.execute(&wf, HashMap::new()).await.unwrap();

    assert_eq!(result.failed_nodes, 1);
    assert_eq!(result.completed_nodes, 1);

    let error = result.outputs.get(&bad).unwrap().get("error").unwrap();
    assert!(error.as_str().unwrap().contains("boom"));

    // Downstream node still ran and received the error record
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(result
        .outputs
        .get(&after)
        .unwrap()
        .contains_key("upstream_error"));
}

#[tokio::test]
async fn failure_without_continue_on_fail_stops_workflow() {
    let calls = Arc::new(AtomicUsize::new(0));
    let runtime = runtime_with(&calls);

    let mut wf = Workflow::new("stop");
    let bad = wf.add_node(NodeSpec::new("test.fail"));
    let after = wf.add_node(NodeSpec::new("test.passthrough"));
    wf.connect(bad, "error", after, "in");

    let result = runtime.execute(&wf, HashMap::new()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn cyclic_workflow_is_rejected() {
    let calls = Arc::new(AtomicUsize::new(0));
    let runtime = runtime_with(&calls);

    let mut wf = Workflow::new("cycle");
    let a = wf.add_node(NodeSpec::new("test.passthrough"));
    let b = wf.add_node(NodeSpec::new("test.passthrough"));
    wf.connect(a, "out", b, "in");
    wf.connect(b, "out", a, "in");

    match runtime.execute(&wf, HashMap::new()).await {
        Err(FlowError::Workflow(WorkflowError::CyclicDependency)) => {}
        other => panic!("expected CyclicDependency, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn diamond_dag_collects_inputs_from_both_branches() {
    let calls = Arc::new(AtomicUsize::new(0));
    let runtime = runtime_with(&calls);

    let mut wf = Workflow::new("diamond");
    let top = wf.add_node(NodeSpec::new("test.passthrough"));
    let left = wf.add_node(NodeSpec::new("test.passthrough"));
    let right = wf.add_node(NodeSpec::new("test.passthrough"));
    let bottom = wf.add_node(NodeSpec::new("test.passthrough"));
    wf.connect(top, "seed", left, "seed");
    wf.connect(top, "seed", right, "seed");
    wf.connect(left, "seed", bottom, "from_left");
    wf.connect(right, "seed", bottom, "from_right");

    let result = runtime
        .execute(&wf, inputs(&[("seed", Value::Number(7.0))]))
        .await
        .unwrap();

    let bottom_out = result.outputs.get(&bottom).unwrap();
    assert_eq!(bottom_out.get("from_left").unwrap(), &Value::Number(7.0));
    assert_eq!(bottom_out.get("from_right").unwrap(), &Value::Number(7.0));
}

#[tokio::test]
async fn in_flight_branch_is_not_dispatched_twice() {
    let calls = Arc::new(AtomicUsize::new(0));
    let runtime = runtime_with(&calls);

    // Fan-out to three slow branches: all are in flight at once, and
    // the scheduler keeps polling while they run. Each branch must be
    // dispatched exactly once.
    let mut wf = Workflow::new("fan-out");
    let top = wf.add_node(NodeSpec::new("test.slow"));
    let mut branches = Vec::new();
    for _ in 0..3 {
        let branch = wf.add_node(NodeSpec::new("test.slow"));
        wf.connect(top, "seed", branch, "seed");
        branches.push(branch);
    }
    let bottom = wf.add_node(NodeSpec::new("test.passthrough"));
    for (i, branch) in branches.iter().enumerate() {
        wf.connect(*branch, "seed", bottom, format!("in_{}", i));
    }

    let result = runtime
        .execute(&wf, inputs(&[("seed", Value::Number(1.0))]))
        .await
        .unwrap();

    assert_eq!(result.completed_nodes, 5);
    assert_eq!(result.failed_nodes, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    let bottom_out = result.outputs.get(&bottom).unwrap();
    for i in 0..3 {
        assert_eq!(
            bottom_out.get(&format!("in_{}", i)).unwrap(),
            &Value::Number(1.0)
        );
    }
}

#[tokio::test]
async fn credentials_are_resolved_into_node_context() {
    let calls = Arc::new(AtomicUsize::new(0));
    let runtime = runtime_with(&calls);

    let mut creds = Credentials::new();
    creds.insert("api_key".to_string(), "s3cret".to_string());
    runtime.credentials().set("service", creds).await;

    let mut wf = Workflow::new("creds");
    let node = wf.add_node(NodeSpec::new("test.cred_echo").with_credential("service"));

    let result = runtime.execute(&wf, HashMap::new()).await.unwrap();
    assert_eq!(
        result.outputs.get(&node).unwrap().get("key").unwrap(),
        &Value::String("s3cret".into())
    );
}

#[tokio::test]
async fn unknown_credential_fails_before_execution() {
    let calls = Arc::new(AtomicUsize::new(0));
    let runtime = runtime_with(&calls);

    let mut wf = Workflow::new("missing-creds");
    wf.add_node(NodeSpec::new("test.cred_echo").with_credential("nope"));

    let result = runtime.execute(&wf, HashMap::new()).await;
    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
