use async_trait::async_trait;
use loomcore::{Node, NodeContext, NodeError, NodeOutput, Value};
use loomruntime::{NodeFactory, NodeTypeInfo, PortDefinition};
use std::collections::HashMap;

const DEFAULT_BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// BigQuery "get all records" node.
///
/// Reads rows from a table via the tabledata API, optionally simplifying the
/// cell format using the table schema. External tables reject the tabledata
/// API; the upstream error carries no structured code for this, only the
/// word EXTERNAL in its message, so that substring triggers a legacy-SQL
/// query fallback. Any other error propagates unchanged.
pub struct BigQueryGetAllNode {
    client: reqwest::Client,
}

impl BigQueryGetAllNode {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn api_request(
        &self,
        method: reqwest::Method,
        url: &str,
        token: &str,
        query: &[(String, String)],
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, NodeError> {
        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(token)
            .query(query);

        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NodeError::Api(format!("Request failed: {}", e)))?;

        let status = response.status();
        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| NodeError::Api(format!("Invalid response body: {}", e)))?;

        if !status.is_success() {
            let message = payload
                .pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(String::from)
                .unwrap_or_else(|| format!("HTTP {}", status));
            return Err(NodeError::Api(message));
        }

        Ok(payload)
    }

    /// Fetch rows (and schema fields when simplifying) via the tabledata API
    async fn fetch_rows(
        &self,
        ctx: &NodeContext,
        base_url: &str,
        token: &str,
        project: &str,
        dataset: &str,
        table: &str,
        return_all: bool,
        limit: u64,
        simplify: bool,
        selected_fields: Option<&str>,
    ) -> Result<(Vec<serde_json::Value>, Vec<String>), NodeError> {
        let mut fields = Vec::new();

        if simplify {
            let table_url = format!(
                "{}/projects/{}/datasets/{}/tables/{}",
                base_url, project, dataset, table
            );
            let meta = self
                .api_request(reqwest::Method::GET, &table_url, token, &[], None)
                .await?;

            if let Some(schema_fields) = meta.pointer("/schema/fields").and_then(|f| f.as_array())
            {
                for field in schema_fields {
                    fields.extend(extract_schema_fields(field));
                }
            }
        }

        let mut query: Vec<(String, String)> = Vec::new();
        if let Some(selected) = selected_fields {
            fields = selected.split(',').map(|f| f.trim().to_string()).collect();
            query.push(("selectedFields".to_string(), selected.to_string()));
        }

        let data_url = format!(
            "{}/projects/{}/datasets/{}/tables/{}/data",
            base_url, project, dataset, table
        );

        let mut rows = Vec::new();
        if return_all {
            let mut page_token: Option<String> = None;
            loop {
                let mut page_query = query.clone();
                if let Some(token_value) = &page_token {
                    page_query.push(("pageToken".to_string(), token_value.clone()));
                }
                let page = self
                    .api_request(reqwest::Method::GET, &data_url, token, &page_query, None)
                    .await?;

                if let Some(page_rows) = page.get("rows").and_then(|r| r.as_array()) {
                    rows.extend(page_rows.iter().cloned());
                }

                page_token = page
                    .get("pageToken")
                    .and_then(|t| t.as_str())
                    .map(String::from);
                if page_token.is_none() {
                    break;
                }
                ctx.events
                    .progress(0.0, Some(format!("{} rows fetched", rows.len())));
            }
        } else {
            query.push(("maxResults".to_string(), limit.to_string()));
            let page = self
                .api_request(reqwest::Method::GET, &data_url, token, &query, None)
                .await?;
            if let Some(page_rows) = page.get("rows").and_then(|r| r.as_array()) {
                rows.extend(page_rows.iter().cloned());
            }
        }

        Ok((rows, fields))
    }

    /// Legacy-SQL fallback for tables the tabledata API refuses
    async fn fetch_rows_legacy(
        &self,
        base_url: &str,
        token: &str,
        project: &str,
        dataset: &str,
        table: &str,
        limit: u64,
    ) -> Result<(Vec<serde_json::Value>, Vec<String>), NodeError> {
        let query_url = format!("{}/projects/{}/queries", base_url, project);
        let body = serde_json::json!({
            "query": build_legacy_query(project, dataset, table, limit),
        });

        let response = self
            .api_request(reqwest::Method::POST, &query_url, token, &[], Some(body))
            .await?;

        let rows = response
            .get("rows")
            .and_then(|r| r.as_array())
            .cloned()
            .unwrap_or_default();

        let mut fields = Vec::new();
        if let Some(schema_fields) = response.pointer("/schema/fields").and_then(|f| f.as_array())
        {
            for field in schema_fields {
                fields.extend(extract_schema_fields(field));
            }
        }

        Ok((rows, fields))
    }
}

impl Default for BigQueryGetAllNode {
    fn default() -> Self {
        Self::new()
    }
}

/// The tabledata API rejects EXTERNAL tables with a plain-text message;
/// there is no structured error code to match on.
fn is_external_table_error(message: &str) -> bool {
    message.contains("EXTERNAL")
}

/// Row cap for the fallback query; returning all rows means no LIMIT
fn legacy_limit(return_all: bool, limit: u64) -> u64 {
    if return_all {
        0
    } else {
        limit
    }
}

/// Legacy SQL with the `[project:dataset.table]` table syntax
fn build_legacy_query(project: &str, dataset: &str, table: &str, limit: u64) -> String {
    if limit > 0 {
        format!(
            "SELECT * FROM [{}:{}.{}] LIMIT {};",
            project, dataset, table, limit
        )
    } else {
        format!("SELECT * FROM [{}:{}.{}];", project, dataset, table)
    }
}

/// Flatten a schema field into dotted paths; RECORD fields recurse
fn extract_schema_fields(field: &serde_json::Value) -> Vec<String> {
    let name = field
        .get("name")
        .and_then(|n| n.as_str())
        .unwrap_or_default();

    match field.get("fields").and_then(|f| f.as_array()) {
        Some(nested) if !nested.is_empty() => nested
            .iter()
            .flat_map(extract_schema_fields)
            .map(|sub| format!("{}.{}", name, sub))
            .collect(),
        _ => vec![name.to_string()],
    }
}

/// Name of the output field for a (possibly sub-selected) schema path
fn parse_field(field: &str) -> String {
    field.rsplit('.').next().unwrap_or(field).to_string()
}

/// Zip each row's `f[].v` cells with the schema field names
fn simplify_rows(rows: &[serde_json::Value], fields: &[String]) -> Vec<serde_json::Value> {
    rows.iter()
        .map(|row| {
            let cells = row.get("f").and_then(|f| f.as_array());
            let mut record = serde_json::Map::new();
            if let Some(cells) = cells {
                for (field, cell) in fields.iter().zip(cells.iter()) {
                    let value = cell.get("v").cloned().unwrap_or(serde_json::Value::Null);
                    record.insert(field.clone(), value);
                }
            }
            serde_json::Value::Object(record)
        })
        .collect()
}

#[async_trait]
impl Node for BigQueryGetAllNode {
    fn node_type(&self) -> &str {
        "bigquery.get_all"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let project = ctx.require_str_config("project_id")?.to_string();
        let dataset = ctx.require_str_config("dataset_id")?.to_string();
        let table = ctx.require_str_config("table_id")?.to_string();

        let return_all = ctx
            .get_config_or("return_all", Value::Bool(false))
            .as_bool()
            .unwrap_or(false);
        let limit = ctx
            .get_config_or("limit", Value::Number(50.0))
            .as_f64()
            .unwrap_or(50.0) as u64;
        let simplify = ctx
            .get_config_or("simplify", Value::Bool(true))
            .as_bool()
            .unwrap_or(true);
        let selected_fields = ctx
            .config
            .get("selected_fields")
            .and_then(|v| v.as_str())
            .map(String::from);

        let base_url_value =
            ctx.get_config_or("base_url", Value::String(DEFAULT_BASE_URL.to_string()));
        let base_url = base_url_value.as_str().unwrap_or(DEFAULT_BASE_URL);

        let token = ctx.require_credential("access_token")?.to_string();

        let fetched = self
            .fetch_rows(
                &ctx,
                base_url,
                &token,
                &project,
                &dataset,
                &table,
                return_all,
                limit,
                simplify,
                selected_fields.as_deref(),
            )
            .await;

        let (rows, mut fields) = match fetched {
            Ok(result) => result,
            Err(NodeError::Api(message)) if is_external_table_error(&message) => {
                ctx.events
                    .warn("table is EXTERNAL, falling back to a legacy-SQL query");
                self.fetch_rows_legacy(
                    base_url,
                    &token,
                    &project,
                    &dataset,
                    &table,
                    legacy_limit(return_all, limit),
                )
                .await?
            }
            Err(e) => return Err(e),
        };

        if selected_fields.is_some() {
            fields = fields.iter().map(|f| parse_field(f)).collect();
        }

        let output_rows = if simplify {
            simplify_rows(&rows, &fields)
        } else {
            rows
        };

        ctx.events
            .info(format!("Fetched {} row(s)", output_rows.len()));

        let count = output_rows.len();
        let mut output = NodeOutput::new().with_output(
            "rows",
            Value::Json(serde_json::Value::Array(output_rows)),
        );
        output.metadata.items_processed = Some(count);
        Ok(output)
    }
}

pub struct BigQueryGetAllNodeFactory;

impl NodeFactory for BigQueryGetAllNodeFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(BigQueryGetAllNode::new()))
    }

    fn node_type(&self) -> &str {
        "bigquery.get_all"
    }

    fn info(&self) -> NodeTypeInfo {
        NodeTypeInfo {
            description: "Read all records from a BigQuery table".to_string(),
            category: "database".to_string(),
            credential: Some("google_api".to_string()),
            inputs: vec![],
            outputs: vec![PortDefinition::required("rows", "Fetched rows")],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_triggers_only_on_external_substring() {
        assert!(is_external_table_error(
            "Cannot read a table of type EXTERNAL with tabledata.list"
        ));
        assert!(!is_external_table_error("Permission denied"));
        assert!(!is_external_table_error("external table not supported"));
    }

    #[test]
    fn legacy_query_uses_bracketed_table_syntax() {
        assert_eq!(
            build_legacy_query("proj", "ds", "tbl", 25),
            "SELECT * FROM [proj:ds.tbl] LIMIT 25;"
        );
        assert_eq!(
            build_legacy_query("proj", "ds", "tbl", 0),
            "SELECT * FROM [proj:ds.tbl];"
        );
    }

    #[test]
    fn return_all_fallback_query_has_no_limit() {
        assert_eq!(
            build_legacy_query("proj", "ds", "tbl", legacy_limit(true, 50)),
            "SELECT * FROM [proj:ds.tbl];"
        );
        assert_eq!(
            build_legacy_query("proj", "ds", "tbl", legacy_limit(false, 50)),
            "SELECT * FROM [proj:ds.tbl] LIMIT 50;"
        );
    }

    #[test]
    fn schema_fields_flatten_records_into_dotted_paths() {
        let field = serde_json::json!({
            "name": "address",
            "type": "RECORD",
            "fields": [
                { "name": "city", "type": "STRING" },
                {
                    "name": "geo",
                    "type": "RECORD",
                    "fields": [{ "name": "lat", "type": "FLOAT" }]
                }
            ]
        });
        assert_eq!(
            extract_schema_fields(&field),
            vec!["address.city", "address.geo.lat"]
        );

        let scalar = serde_json::json!({ "name": "id", "type": "INTEGER" });
        assert_eq!(extract_schema_fields(&scalar), vec!["id"]);
    }

    #[test]
    fn parse_field_takes_the_leaf_segment() {
        assert_eq!(parse_field("a"), "a");
        assert_eq!(parse_field("e.d.f"), "f");
    }

    #[test]
    fn simplify_zips_cells_with_field_names() {
        let rows = vec![serde_json::json!({
            "f": [{ "v": "1" }, { "v": "ada" }]
        })];
        let fields = vec!["id".to_string(), "name".to_string()];

        let simplified = simplify_rows(&rows, &fields);
        assert_eq!(
            simplified,
            vec![serde_json::json!({ "id": "1", "name": "ada" })]
        );
    }

    #[test]
    fn simplify_tolerates_missing_cells() {
        let rows = vec![serde_json::json!({ "f": [{ "v": "only" }] })];
        let fields = vec!["a".to_string(), "b".to_string()];
        let simplified = simplify_rows(&rows, &fields);
        assert_eq!(simplified, vec![serde_json::json!({ "a": "only" })]);
    }
}
