use async_trait::async_trait;
use loomcore::{Node, NodeContext, NodeError, NodeOutput, Value};
use loomruntime::{NodeFactory, NodeTypeInfo};
use std::collections::HashMap;

/// Simple debug node that logs its inputs
pub struct DebugNode;

#[async_trait]
impl Node for DebugNode {
    fn node_type(&self) -> &str {
        "debug.log"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let message = ctx
            .inputs
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("(no message)");

        ctx.events.info(format!("DEBUG: {}", message));

        for (key, value) in &ctx.inputs {
            ctx.events.info(format!("  {}: {:?}", key, value));
        }

        Ok(NodeOutput::new().with_output("message", message.to_string()))
    }
}

pub struct DebugNodeFactory;

impl NodeFactory for DebugNodeFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(DebugNode))
    }

    fn node_type(&self) -> &str {
        "debug.log"
    }

    fn info(&self) -> NodeTypeInfo {
        NodeTypeInfo {
            description: "Logs input values for debugging".to_string(),
            category: "debug".to_string(),
            ..Default::default()
        }
    }
}
