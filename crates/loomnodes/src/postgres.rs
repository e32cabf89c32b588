use async_trait::async_trait;
use loomcore::{Node, NodeContext, NodeError, NodeOutput, Value};
use loomruntime::{NodeFactory, NodeTypeInfo, PortDefinition};
use std::collections::HashMap;
use tokio_postgres::types::ToSql;
use tokio_postgres::NoTls;

/// Postgres insert node.
///
/// Inserts the `rows` input into a table using one of three execution
/// modes. Column values bind as text parameters with an optional per-column
/// cast (`id:int` binds as `$n::int`), and inserted rows come back as JSON
/// via `row_to_json` so no per-type decoding is needed.
pub struct PostgresInsertNode;

/// How a batch of rows is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Single batched multi-row insert; any failure fails the whole batch
    Multiple,
    /// Per-row insert inside one all-or-nothing transaction
    Transaction,
    /// Per-row insert, each its own unit of work
    Independently,
}

impl QueryMode {
    pub fn parse(s: &str) -> Result<Self, NodeError> {
        match s {
            "multiple" => Ok(QueryMode::Multiple),
            "transaction" => Ok(QueryMode::Transaction),
            "independently" => Ok(QueryMode::Independently),
            other => Err(NodeError::Configuration(format!(
                "Unknown query mode: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
struct Column {
    name: String,
    cast: Option<String>,
}

/// Parsed insert target: table identity, columns with casts, returning list
#[derive(Debug, Clone)]
pub struct InsertPlan {
    schema: String,
    table: String,
    columns: Vec<Column>,
    return_fields: Vec<String>,
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl InsertPlan {
    /// Parse the column spec string (`id:int,name:text,notes`) and the
    /// returning list (`*` or a comma list of fields).
    pub fn parse(
        schema: &str,
        table: &str,
        columns: &str,
        return_fields: &str,
    ) -> Result<Self, NodeError> {
        if table.trim().is_empty() {
            return Err(NodeError::Configuration("Table name is required".into()));
        }

        let mut parsed = Vec::new();
        for part in columns.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let mut pieces = part.splitn(2, ':');
            let name = pieces.next().unwrap_or_default().trim().to_string();
            let cast = pieces
                .next()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty());
            if name.is_empty() {
                return Err(NodeError::Configuration(format!(
                    "Invalid column spec: '{}'",
                    part
                )));
            }
            parsed.push(Column { name, cast });
        }

        if parsed.is_empty() {
            return Err(NodeError::Configuration(
                "At least one column is required".into(),
            ));
        }

        let return_fields: Vec<String> = return_fields
            .split(',')
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();

        Ok(Self {
            schema: if schema.trim().is_empty() {
                "public".to_string()
            } else {
                schema.trim().to_string()
            },
            table: table.trim().to_string(),
            columns: parsed,
            return_fields,
        })
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    fn returning_clause(&self) -> String {
        if self.return_fields.is_empty() || self.return_fields.iter().any(|f| f == "*") {
            "*".to_string()
        } else {
            self.return_fields
                .iter()
                .map(|f| quote_ident(f))
                .collect::<Vec<_>>()
                .join(", ")
        }
    }

    fn values_group(&self, start_param: usize) -> String {
        let placeholders: Vec<String> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, col)| match &col.cast {
                Some(cast) => format!("${}::{}", start_param + i, cast),
                None => format!("${}", start_param + i),
            })
            .collect();
        format!("({})", placeholders.join(", "))
    }

    /// SQL for inserting `row_count` rows in one statement. Rows come back
    /// as a single `row` json column.
    pub fn insert_sql(&self, row_count: usize) -> String {
        let column_list = self
            .columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");

        let groups: Vec<String> = (0..row_count)
            .map(|r| self.values_group(r * self.columns.len() + 1))
            .collect();

        format!(
            "WITH ins AS (INSERT INTO {}.{} ({}) VALUES {} RETURNING {}) \
             SELECT row_to_json(ins) AS row FROM ins",
            quote_ident(&self.schema),
            quote_ident(&self.table),
            column_list,
            groups.join(", "),
            self.returning_clause(),
        )
    }

    /// Bindable parameters for one row. Missing or null columns bind as NULL.
    pub fn params_for(&self, row: &Value) -> Result<Vec<Option<String>>, NodeError> {
        let get = |name: &str| -> Option<Value> {
            match row {
                Value::Object(map) => map.get(name).cloned(),
                Value::Json(serde_json::Value::Object(map)) => {
                    map.get(name).cloned().map(Value::Json)
                }
                _ => None,
            }
        };

        if !matches!(
            row,
            Value::Object(_) | Value::Json(serde_json::Value::Object(_))
        ) {
            return Err(NodeError::InvalidInputType {
                field: "rows".to_string(),
                expected: "array of objects".to_string(),
                actual: "other".to_string(),
            });
        }

        Ok(self
            .columns
            .iter()
            .map(|col| match get(&col.name) {
                None | Some(Value::Null) | Some(Value::Json(serde_json::Value::Null)) => None,
                Some(value) => Some(value.to_sql_text()),
            })
            .collect())
    }
}

/// Minimal SQL surface the insert modes need. The production implementation
/// wraps a live `tokio_postgres::Client`; tests script failures against it.
#[async_trait]
pub trait SqlExecutor: Send {
    async fn query(
        &mut self,
        sql: &str,
        params: &[Option<String>],
    ) -> Result<Vec<serde_json::Value>, NodeError>;

    async fn begin(&mut self) -> Result<(), NodeError>;
    async fn commit(&mut self) -> Result<(), NodeError>;
    async fn rollback(&mut self) -> Result<(), NodeError>;
}

struct PgExecutor {
    client: tokio_postgres::Client,
}

#[async_trait]
impl SqlExecutor for PgExecutor {
    async fn query(
        &mut self,
        sql: &str,
        params: &[Option<String>],
    ) -> Result<Vec<serde_json::Value>, NodeError> {
        let refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        let rows = self
            .client
            .query(sql, &refs)
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Query failed: {}", e)))?;

        rows.iter()
            .map(|row| {
                row.try_get::<_, serde_json::Value>("row")
                    .map_err(|e| NodeError::ExecutionFailed(format!("Row decode failed: {}", e)))
            })
            .collect()
    }

    async fn begin(&mut self) -> Result<(), NodeError> {
        self.client
            .batch_execute("BEGIN")
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("BEGIN failed: {}", e)))
    }

    async fn commit(&mut self) -> Result<(), NodeError> {
        self.client
            .batch_execute("COMMIT")
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("COMMIT failed: {}", e)))
    }

    async fn rollback(&mut self) -> Result<(), NodeError> {
        self.client
            .batch_execute("ROLLBACK")
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("ROLLBACK failed: {}", e)))
    }
}

fn error_record(item: usize, error: &NodeError) -> serde_json::Value {
    serde_json::json!({
        "error": error.to_string(),
        "item": item,
    })
}

/// Run the insert for a batch of rows under the given mode.
///
/// - `Multiple`: one statement for all rows; an error fails the batch.
/// - `Transaction`: per-row inserts in one transaction. An error aborts the
///   remaining items; with `continue_on_fail` the rows inserted so far are
///   returned (followed by the failure record), otherwise the error is
///   raised and all results discarded. The transaction rolls back either way.
/// - `Independently`: per-row inserts, each its own unit of work. With
///   `continue_on_fail` a failed item is recorded and the rest still run.
pub async fn insert_items(
    mode: QueryMode,
    plan: &InsertPlan,
    rows: &[Value],
    continue_on_fail: bool,
    exec: &mut dyn SqlExecutor,
) -> Result<Vec<serde_json::Value>, NodeError> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    match mode {
        QueryMode::Multiple => {
            let mut params = Vec::with_capacity(rows.len() * plan.column_names().len());
            for row in rows {
                params.extend(plan.params_for(row)?);
            }
            exec.query(&plan.insert_sql(rows.len()), &params).await
        }

        QueryMode::Transaction => {
            exec.begin().await?;
            let mut results = Vec::new();
            let sql = plan.insert_sql(1);

            for (i, row) in rows.iter().enumerate() {
                let params = plan.params_for(row)?;
                match exec.query(&sql, &params).await {
                    Ok(inserted) => results.extend(inserted),
                    Err(e) => {
                        // The insert error is the outcome; a failed rollback
                        // must not displace it.
                        if let Err(rollback_err) = exec.rollback().await {
                            tracing::warn!(error = %rollback_err, "rollback failed after insert error");
                        }
                        if !continue_on_fail {
                            return Err(e);
                        }
                        results.push(error_record(i, &e));
                        return Ok(results);
                    }
                }
            }

            exec.commit().await?;
            Ok(results)
        }

        QueryMode::Independently => {
            let mut results = Vec::new();
            let sql = plan.insert_sql(1);

            for (i, row) in rows.iter().enumerate() {
                let params = plan.params_for(row)?;
                match exec.query(&sql, &params).await {
                    Ok(inserted) => results.extend(inserted),
                    Err(e) => {
                        if !continue_on_fail {
                            return Err(e);
                        }
                        results.push(error_record(i, &e));
                    }
                }
            }

            Ok(results)
        }
    }
}

#[async_trait]
impl Node for PostgresInsertNode {
    fn node_type(&self) -> &str {
        "postgres.insert"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let schema = ctx.get_config_or("schema", Value::String("public".to_string()));
        let table = ctx.require_str_config("table")?.to_string();
        let columns = ctx.require_str_config("columns")?.to_string();
        let return_fields = ctx.get_config_or("return_fields", Value::String("*".to_string()));
        let mode_value = ctx.get_config_or("mode", Value::String("multiple".to_string()));
        let mode = QueryMode::parse(mode_value.as_str().unwrap_or("multiple"))?;

        let plan = InsertPlan::parse(
            schema.as_str().unwrap_or("public"),
            &table,
            &columns,
            return_fields.as_str().unwrap_or("*"),
        )?;

        let rows: Vec<Value> = match ctx.require_input("rows")? {
            Value::Array(items) => items.clone(),
            Value::Json(serde_json::Value::Array(items)) => {
                items.iter().cloned().map(Value::Json).collect()
            }
            _ => {
                return Err(NodeError::InvalidInputType {
                    field: "rows".to_string(),
                    expected: "array".to_string(),
                    actual: "other".to_string(),
                })
            }
        };

        let conn_string = ctx.require_credential("connection_string")?;
        let (client, connection) = tokio_postgres::connect(conn_string, NoTls)
            .await
            .map_err(|e| NodeError::InitializationFailed(format!("Postgres connect: {}", e)))?;

        // Drive the connection until the node is done with it
        let conn_task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "postgres connection error");
            }
        });

        ctx.events.info(format!(
            "Inserting {} row(s) into {}.{} ({:?} mode)",
            rows.len(),
            plan.schema,
            plan.table,
            mode
        ));

        let mut exec = PgExecutor { client };
        let result = insert_items(mode, &plan, &rows, ctx.continue_on_fail, &mut exec).await;

        drop(exec);
        conn_task.abort();

        let inserted = result?;
        let count = inserted.len();

        let mut output = NodeOutput::new().with_output(
            "rows",
            Value::Array(inserted.into_iter().map(Value::Json).collect()),
        );
        output.metadata.items_processed = Some(count);
        Ok(output)
    }
}

pub struct PostgresInsertNodeFactory;

impl NodeFactory for PostgresInsertNodeFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(PostgresInsertNode))
    }

    fn node_type(&self) -> &str {
        "postgres.insert"
    }

    fn info(&self) -> NodeTypeInfo {
        NodeTypeInfo {
            description: "Insert rows into a Postgres table".to_string(),
            category: "database".to_string(),
            credential: Some("postgres".to_string()),
            inputs: vec![PortDefinition::required("rows", "Array of row objects")],
            outputs: vec![PortDefinition::required("rows", "Inserted rows")],
        }
    }
}
