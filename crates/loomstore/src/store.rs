use crate::{migrations::MigrationRunner, Result, StoreError};
use loomcore::{PinData, Workflow, WorkflowId};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

/// SQLite-backed workflow storage.
///
/// The full definition is stored as a JSON column; pin data and trigger
/// count are broken out into their own columns so they can be updated
/// without rewriting the definition.
#[derive(Clone)]
pub struct WorkflowStore {
    pool: SqlitePool,
    table: String,
}

/// Listing row for a stored workflow
#[derive(Debug, Clone)]
pub struct WorkflowSummary {
    pub id: WorkflowId,
    pub name: String,
    pub active: bool,
    pub trigger_count: i64,
}

impl WorkflowStore {
    /// Open (or create) a store at the given file path and run pending
    /// migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        Self::with_pool(pool).await
    }

    /// In-memory store, used by tests. A single connection keeps every
    /// query on the same database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(sqlx::Error::from)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        let runner = MigrationRunner::new(pool.clone(), "");
        let applied = runner.migrate_up().await?;
        if applied > 0 {
            tracing::info!(applied, "applied pending migrations");
        }

        Ok(Self {
            pool,
            table: "workflow_entity".to_string(),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or update a workflow
    pub async fn save(&self, workflow: &Workflow) -> Result<()> {
        let definition = serde_json::to_string(workflow)?;
        let pin_data = serde_json::to_string(&workflow.pin_data)?;

        sqlx::query(&format!(
            "INSERT INTO {} (id, name, active, definition, pin_data, trigger_count, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                active = excluded.active,
                definition = excluded.definition,
                pin_data = excluded.pin_data,
                trigger_count = excluded.trigger_count,
                updated_at = CURRENT_TIMESTAMP",
            self.table
        ))
        .bind(workflow.id.to_string())
        .bind(&workflow.name)
        .bind(workflow.active)
        .bind(&definition)
        .bind(&pin_data)
        .bind(workflow.trigger_count() as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load a workflow by id. The pin_data column wins over whatever the
    /// stored definition carries, so pin updates survive reloads.
    pub async fn load(&self, id: WorkflowId) -> Result<Option<Workflow>> {
        let row = sqlx::query(&format!(
            "SELECT definition, pin_data FROM {} WHERE id = ?",
            self.table
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let definition: String = row.get("definition");
        let mut workflow: Workflow =
            serde_json::from_str(&definition).map_err(|e| StoreError::InvalidWorkflow {
                id: id.to_string(),
                reason: e.to_string(),
            })?;

        if let Some(pin_json) = row.get::<Option<String>, _>("pin_data") {
            workflow.pin_data = serde_json::from_str::<PinData>(&pin_json).map_err(|e| {
                StoreError::InvalidWorkflow {
                    id: id.to_string(),
                    reason: format!("bad pin data: {}", e),
                }
            })?;
        }

        Ok(Some(workflow))
    }

    pub async fn list(&self) -> Result<Vec<WorkflowSummary>> {
        let rows = sqlx::query(&format!(
            "SELECT id, name, active, trigger_count FROM {} ORDER BY name",
            self.table
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let id_text: String = row.get("id");
                let id = WorkflowId::from_str(&id_text).map_err(|e| {
                    StoreError::InvalidWorkflow {
                        id: id_text.clone(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(WorkflowSummary {
                    id,
                    name: row.get("name"),
                    active: row.get("active"),
                    trigger_count: row.get("trigger_count"),
                })
            })
            .collect()
    }

    /// Delete a workflow; returns whether a row was removed
    pub async fn delete(&self, id: WorkflowId) -> Result<bool> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE id = ?", self.table))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace the pinned data for a stored workflow
    pub async fn update_pin_data(&self, id: WorkflowId, pin_data: &PinData) -> Result<()> {
        let json = serde_json::to_string(pin_data)?;
        let result = sqlx::query(&format!(
            "UPDATE {} SET pin_data = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            self.table
        ))
        .bind(&json)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::WorkflowNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Bump the trigger count (normally on activation or execution)
    pub async fn increment_trigger_count(&self, id: WorkflowId) -> Result<i64> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET trigger_count = trigger_count + 1 WHERE id = ?",
            self.table
        ))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::WorkflowNotFound(id.to_string()));
        }

        let row = sqlx::query(&format!(
            "SELECT trigger_count FROM {} WHERE id = ?",
            self.table
        ))
        .bind(id.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("trigger_count"))
    }
}
