//! Sequential schema migrations.
//!
//! Each migration is an up/down pair named after what it changes. Applied
//! migration names are tracked in a `migrations` table; `migrate_up` applies
//! pending migrations in order and `migrate_down` reverts the most recent.
//! Reverting a migration must leave the schema column set identical to its
//! pre-migration state.

use crate::{Result, StoreError};
use async_trait::async_trait;
use sqlx::SqlitePool;

/// Context handed to each migration
pub struct MigrationContext<'a> {
    pub pool: &'a SqlitePool,
    pub table_prefix: String,
}

impl MigrationContext<'_> {
    /// Prefixed table name
    pub fn table(&self, name: &str) -> String {
        format!("{}{}", self.table_prefix, name)
    }
}

#[async_trait]
pub trait Migration: Send + Sync {
    fn name(&self) -> &str;
    async fn up(&self, ctx: &MigrationContext<'_>) -> Result<()>;
    async fn down(&self, ctx: &MigrationContext<'_>) -> Result<()>;
}

/// All shipped migrations, in application order
pub fn all_migrations() -> Vec<Box<dyn Migration>> {
    vec![
        Box::new(CreateInitialTables),
        Box::new(IntroducePinData),
        Box::new(CreateWorkflowsEditorRole),
        Box::new(AddTriggerCountColumn),
    ]
}

/// Base tables: workflow definitions and roles
pub struct CreateInitialTables;

#[async_trait]
impl Migration for CreateInitialTables {
    fn name(&self) -> &str {
        "CreateInitialTables"
    }

    async fn up(&self, ctx: &MigrationContext<'_>) -> Result<()> {
        sqlx::query(&format!(
            "CREATE TABLE {} (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 0,
                definition JSON NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )",
            ctx.table("workflow_entity")
        ))
        .execute(ctx.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE TABLE {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                scope TEXT NOT NULL,
                UNIQUE(scope, name)
            )",
            ctx.table("role")
        ))
        .execute(ctx.pool)
        .await?;

        Ok(())
    }

    async fn down(&self, ctx: &MigrationContext<'_>) -> Result<()> {
        sqlx::query(&format!("DROP TABLE {}", ctx.table("workflow_entity")))
            .execute(ctx.pool)
            .await?;
        sqlx::query(&format!("DROP TABLE {}", ctx.table("role")))
            .execute(ctx.pool)
            .await?;
        Ok(())
    }
}

/// Adds the pin_data column holding manually fixed sample outputs per node
pub struct IntroducePinData;

#[async_trait]
impl Migration for IntroducePinData {
    fn name(&self) -> &str {
        "IntroducePinData"
    }

    async fn up(&self, ctx: &MigrationContext<'_>) -> Result<()> {
        sqlx::query(&format!(
            "ALTER TABLE {} ADD COLUMN pin_data JSON",
            ctx.table("workflow_entity")
        ))
        .execute(ctx.pool)
        .await?;
        Ok(())
    }

    async fn down(&self, ctx: &MigrationContext<'_>) -> Result<()> {
        sqlx::query(&format!(
            "ALTER TABLE {} DROP COLUMN pin_data",
            ctx.table("workflow_entity")
        ))
        .execute(ctx.pool)
        .await?;
        Ok(())
    }
}

/// Seeds the editor role for workflows. Idempotent on re-application.
pub struct CreateWorkflowsEditorRole;

#[async_trait]
impl Migration for CreateWorkflowsEditorRole {
    fn name(&self) -> &str {
        "CreateWorkflowsEditorRole"
    }

    async fn up(&self, ctx: &MigrationContext<'_>) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (name, scope) VALUES ('editor', 'workflow')
             ON CONFLICT DO NOTHING",
            ctx.table("role")
        ))
        .execute(ctx.pool)
        .await?;
        Ok(())
    }

    async fn down(&self, ctx: &MigrationContext<'_>) -> Result<()> {
        sqlx::query(&format!(
            "DELETE FROM {} WHERE name = 'editor' AND scope = 'workflow'",
            ctx.table("role")
        ))
        .execute(ctx.pool)
        .await?;
        Ok(())
    }
}

/// Adds the trigger_count column, populated by the runtime on activation
pub struct AddTriggerCountColumn;

#[async_trait]
impl Migration for AddTriggerCountColumn {
    fn name(&self) -> &str {
        "AddTriggerCountColumn"
    }

    async fn up(&self, ctx: &MigrationContext<'_>) -> Result<()> {
        sqlx::query(&format!(
            "ALTER TABLE {} ADD COLUMN trigger_count INTEGER NOT NULL DEFAULT 0",
            ctx.table("workflow_entity")
        ))
        .execute(ctx.pool)
        .await?;
        Ok(())
    }

    async fn down(&self, ctx: &MigrationContext<'_>) -> Result<()> {
        sqlx::query(&format!(
            "ALTER TABLE {} DROP COLUMN trigger_count",
            ctx.table("workflow_entity")
        ))
        .execute(ctx.pool)
        .await?;
        Ok(())
    }
}

/// Open the database file and revert the most recently applied migration.
/// Returns the reverted migration's name.
pub async fn revert_last(path: impl AsRef<std::path::Path>) -> Result<String> {
    let options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(false);
    let pool = SqlitePool::connect_with(options).await?;
    MigrationRunner::new(pool, "").migrate_down().await
}

/// Applies and reverts migrations, tracking applied names
pub struct MigrationRunner {
    pool: SqlitePool,
    table_prefix: String,
}

impl MigrationRunner {
    pub fn new(pool: SqlitePool, table_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            table_prefix: table_prefix.into(),
        }
    }

    fn ctx(&self) -> MigrationContext<'_> {
        MigrationContext {
            pool: &self.pool,
            table_prefix: self.table_prefix.clone(),
        }
    }

    async fn ensure_tracking_table(&self) -> Result<()> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                name TEXT PRIMARY KEY,
                applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )",
            self.ctx().table("migrations")
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn applied(&self) -> Result<Vec<String>> {
        self.ensure_tracking_table().await?;
        let rows: Vec<(String,)> = sqlx::query_as(&format!(
            "SELECT name FROM {} ORDER BY rowid",
            self.ctx().table("migrations")
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    /// Apply all pending migrations in order; returns how many ran
    pub async fn migrate_up(&self) -> Result<usize> {
        self.ensure_tracking_table().await?;
        let applied = self.applied().await?;
        let ctx = self.ctx();
        let mut count = 0;

        for migration in all_migrations() {
            if applied.iter().any(|name| name == migration.name()) {
                continue;
            }

            tracing::info!(migration = migration.name(), "applying migration");
            migration.up(&ctx).await?;

            sqlx::query(&format!(
                "INSERT INTO {} (name) VALUES (?)",
                ctx.table("migrations")
            ))
            .bind(migration.name())
            .execute(&self.pool)
            .await?;

            count += 1;
        }

        Ok(count)
    }

    /// Revert the most recently applied migration; returns its name
    pub async fn migrate_down(&self) -> Result<String> {
        self.ensure_tracking_table().await?;
        let applied = self.applied().await?;
        let last = applied.last().cloned().ok_or(StoreError::NothingToRevert)?;

        let migration = all_migrations()
            .into_iter()
            .find(|m| m.name() == last)
            .ok_or_else(|| StoreError::UnknownMigration(last.clone()))?;

        tracing::info!(migration = migration.name(), "reverting migration");
        let ctx = self.ctx();
        migration.down(&ctx).await?;

        sqlx::query(&format!(
            "DELETE FROM {} WHERE name = ?",
            ctx.table("migrations")
        ))
        .bind(&last)
        .execute(&self.pool)
        .await?;

        Ok(last)
    }
}
