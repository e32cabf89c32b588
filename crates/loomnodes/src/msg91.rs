use async_trait::async_trait;
use loomcore::{Node, NodeContext, NodeError, NodeOutput, Value};
use loomruntime::{NodeFactory, NodeTypeInfo, PortDefinition};
use std::collections::HashMap;

const DEFAULT_BASE_URL: &str = "https://api.msg91.com/api";

/// MSG91 SMS node.
///
/// Sends form-encoded requests to the MSG91 API with the `authkey`
/// credential injected into the query of every request.
pub struct Msg91SmsNode {
    client: reqwest::Client,
}

impl Msg91SmsNode {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn api_request(
        &self,
        base_url: &str,
        endpoint: &str,
        authkey: &str,
        form: &HashMap<String, String>,
    ) -> Result<serde_json::Value, NodeError> {
        let url = format!("{}{}", base_url, endpoint);

        let response = self
            .client
            .post(&url)
            .query(&[("authkey", authkey), ("response", "json")])
            .form(form)
            .send()
            .await
            .map_err(|e| NodeError::Api(format!("MSG91 request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| NodeError::Api(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(NodeError::Api(format!("MSG91 HTTP {}: {}", status, text)));
        }

        // The API answers JSON in most paths but a bare request id in others
        Ok(serde_json::from_str(&text)
            .unwrap_or_else(|_| serde_json::Value::String(text.trim().to_string())))
    }
}

impl Default for Msg91SmsNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for Msg91SmsNode {
    fn node_type(&self) -> &str {
        "msg91.sms"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let mobiles = ctx.require_str_input("mobiles")?.to_string();
        let message = ctx.require_str_input("message")?.to_string();
        let sender = ctx.require_str_config("sender")?.to_string();

        let route = ctx.get_config_or("route", Value::String("4".to_string()));
        let base_url_value =
            ctx.get_config_or("base_url", Value::String(DEFAULT_BASE_URL.to_string()));
        let base_url = base_url_value.as_str().unwrap_or(DEFAULT_BASE_URL);

        let authkey = ctx.require_credential("authkey")?.to_string();

        let mut form = HashMap::new();
        form.insert("mobiles".to_string(), mobiles.clone());
        form.insert("message".to_string(), message);
        form.insert("sender".to_string(), sender);
        form.insert(
            "route".to_string(),
            route.as_str().unwrap_or("4").to_string(),
        );
        if let Some(country) = ctx.config.get("country").and_then(|v| v.as_str()) {
            form.insert("country".to_string(), country.to_string());
        }

        ctx.events.info(format!("Sending SMS to {}", mobiles));

        let response = self
            .api_request(base_url, "/sendhttp.php", &authkey, &form)
            .await?;

        Ok(NodeOutput::new().with_output("response", Value::Json(response)))
    }
}

pub struct Msg91SmsNodeFactory;

impl NodeFactory for Msg91SmsNodeFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(Msg91SmsNode::new()))
    }

    fn node_type(&self) -> &str {
        "msg91.sms"
    }

    fn info(&self) -> NodeTypeInfo {
        NodeTypeInfo {
            description: "Send SMS via MSG91".to_string(),
            category: "communication".to_string(),
            credential: Some("msg91".to_string()),
            inputs: vec![
                PortDefinition::required("mobiles", "Comma-separated recipient numbers"),
                PortDefinition::required("message", "Message text"),
            ],
            outputs: vec![PortDefinition::required("response", "API response")],
        }
    }
}
