use async_trait::async_trait;
use loomcore::{Node, NodeContext, NodeError, NodeOutput, Value};
use loomruntime::{NodeFactory, NodeTypeInfo, PortDefinition};
use std::collections::HashMap;

/// HTTP request node
pub struct HttpRequestNode {
    client: reqwest::Client,
}

impl HttpRequestNode {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for HttpRequestNode {
    fn node_type(&self) -> &str {
        "http.request"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let url = ctx.require_str_input("url")?;
        let method_value = ctx.get_config_or("method", Value::String("GET".to_string()));
        let method = method_value.as_str().unwrap_or("GET");

        ctx.events.info(format!("{} {}", method, url));

        let mut request = match method.to_uppercase().as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "PATCH" => self.client.patch(url),
            "DELETE" => self.client.delete(url),
            _ => {
                return Err(NodeError::Configuration(format!(
                    "Unsupported method: {}",
                    method
                )))
            }
        };

        if let Some(body) = ctx.inputs.get("body") {
            if let Some(json) = body.as_json() {
                request = request.json(json);
            } else if let Some(text) = body.as_str() {
                request = request.body(text.to_string());
            }
        }

        if let Some(Value::Object(headers)) = ctx.config.get("headers") {
            for (key, value) in headers {
                if let Some(val_str) = value.as_str() {
                    request = request.header(key, val_str);
                }
            }
        }

        // Bearer auth from a credential, when the node has one attached
        if let Some(token) = ctx.credentials.get("token") {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NodeError::Api(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        let headers_map: HashMap<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.to_string(),
                    Value::String(v.to_str().unwrap_or("").to_string()),
                )
            })
            .collect();

        let body_text = response
            .text()
            .await
            .map_err(|e| NodeError::Api(format!("Failed to read response: {}", e)))?;

        ctx.events.info(format!("Response status: {}", status));

        Ok(NodeOutput::new()
            .with_output("status", status as f64)
            .with_output("body", body_text)
            .with_output("headers", Value::Object(headers_map)))
    }
}

pub struct HttpRequestNodeFactory;

impl NodeFactory for HttpRequestNodeFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(HttpRequestNode::new()))
    }

    fn node_type(&self) -> &str {
        "http.request"
    }

    fn info(&self) -> NodeTypeInfo {
        NodeTypeInfo {
            description: "Make HTTP requests".to_string(),
            category: "http".to_string(),
            credential: None,
            inputs: vec![
                PortDefinition::required("url", "Request URL"),
                PortDefinition::optional("body", "Request body (JSON or text)"),
            ],
            outputs: vec![
                PortDefinition::required("status", "HTTP status code"),
                PortDefinition::required("body", "Response body text"),
                PortDefinition::required("headers", "Response headers"),
            ],
        }
    }
}
