// crates/loomstore/tests/migrations_test.rs

use loomstore::migrations::{
    AddTriggerCountColumn, CreateInitialTables, CreateWorkflowsEditorRole, IntroducePinData,
};
use loomstore::{Migration, MigrationContext, MigrationRunner, StoreError};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

async fn memory_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:").unwrap();
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap()
}

async fn column_names(pool: &SqlitePool, table: &str) -> Vec<String> {
    let rows = sqlx::query(&format!("PRAGMA table_info({})", table))
        .fetch_all(pool)
        .await
        .unwrap();
    let mut names: Vec<String> = rows.iter().map(|row| row.get("name")).collect();
    names.sort();
    names
}

fn ctx(pool: &SqlitePool) -> MigrationContext<'_> {
    MigrationContext {
        pool,
        table_prefix: String::new(),
    }
}

#[tokio::test]
async fn migrate_up_applies_everything_once() {
    let pool = memory_pool().await;
    let runner = MigrationRunner::new(pool.clone(), "");

    assert_eq!(runner.migrate_up().await.unwrap(), 4);
    assert_eq!(runner.migrate_up().await.unwrap(), 0);

    let applied = runner.applied().await.unwrap();
    assert_eq!(
        applied,
        vec![
            "CreateInitialTables",
            "IntroducePinData",
            "CreateWorkflowsEditorRole",
            "AddTriggerCountColumn",
        ]
    );

    let columns = column_names(&pool, "workflow_entity").await;
    assert!(columns.contains(&"pin_data".to_string()));
    assert!(columns.contains(&"trigger_count".to_string()));
}

#[tokio::test]
async fn pin_data_up_then_down_restores_column_set() {
    let pool = memory_pool().await;
    CreateInitialTables.up(&ctx(&pool)).await.unwrap();

    let before = column_names(&pool, "workflow_entity").await;

    IntroducePinData.up(&ctx(&pool)).await.unwrap();
    let during = column_names(&pool, "workflow_entity").await;
    assert!(during.contains(&"pin_data".to_string()));
    assert_ne!(before, during);

    IntroducePinData.down(&ctx(&pool)).await.unwrap();
    assert_eq!(column_names(&pool, "workflow_entity").await, before);
}

#[tokio::test]
async fn trigger_count_up_then_down_restores_column_set() {
    let pool = memory_pool().await;
    CreateInitialTables.up(&ctx(&pool)).await.unwrap();

    let before = column_names(&pool, "workflow_entity").await;

    AddTriggerCountColumn.up(&ctx(&pool)).await.unwrap();
    assert!(column_names(&pool, "workflow_entity")
        .await
        .contains(&"trigger_count".to_string()));

    AddTriggerCountColumn.down(&ctx(&pool)).await.unwrap();
    assert_eq!(column_names(&pool, "workflow_entity").await, before);
}

#[tokio::test]
async fn trigger_count_column_defaults_to_zero() {
    let pool = memory_pool().await;
    CreateInitialTables.up(&ctx(&pool)).await.unwrap();
    AddTriggerCountColumn.up(&ctx(&pool)).await.unwrap();

    sqlx::query("INSERT INTO workflow_entity (id, name, definition) VALUES ('w1', 'wf', '{}')")
        .execute(&pool)
        .await
        .unwrap();

    let row = sqlx::query("SELECT trigger_count FROM workflow_entity WHERE id = 'w1'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(row.get::<i64, _>("trigger_count"), 0);
}

#[tokio::test]
async fn editor_role_seed_is_idempotent_and_revertible() {
    let pool = memory_pool().await;
    CreateInitialTables.up(&ctx(&pool)).await.unwrap();

    CreateWorkflowsEditorRole.up(&ctx(&pool)).await.unwrap();
    // Re-running the seed must not fail or duplicate
    CreateWorkflowsEditorRole.up(&ctx(&pool)).await.unwrap();

    let row = sqlx::query(
        "SELECT COUNT(*) AS n FROM role WHERE name = 'editor' AND scope = 'workflow'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(row.get::<i64, _>("n"), 1);

    CreateWorkflowsEditorRole.down(&ctx(&pool)).await.unwrap();
    let row = sqlx::query("SELECT COUNT(*) AS n FROM role")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(row.get::<i64, _>("n"), 0);
}

#[tokio::test]
async fn migrate_down_reverts_most_recent_first() {
    let pool = memory_pool().await;
    let runner = MigrationRunner::new(pool.clone(), "");
    runner.migrate_up().await.unwrap();

    assert_eq!(runner.migrate_down().await.unwrap(), "AddTriggerCountColumn");
    assert!(!column_names(&pool, "workflow_entity")
        .await
        .contains(&"trigger_count".to_string()));

    assert_eq!(
        runner.migrate_down().await.unwrap(),
        "CreateWorkflowsEditorRole"
    );
    assert_eq!(runner.migrate_down().await.unwrap(), "IntroducePinData");
    assert_eq!(runner.migrate_down().await.unwrap(), "CreateInitialTables");
    assert!(runner.migrate_down().await.is_err());
}

#[tokio::test]
async fn unrecognized_applied_migration_is_reported_as_such() {
    let pool = memory_pool().await;
    let runner = MigrationRunner::new(pool.clone(), "");
    runner.migrate_up().await.unwrap();

    // A tracking entry from some other build of the schema
    sqlx::query("INSERT INTO migrations (name) VALUES ('AddFutureColumn')")
        .execute(&pool)
        .await
        .unwrap();

    match runner.migrate_down().await {
        Err(StoreError::UnknownMigration(name)) => assert_eq!(name, "AddFutureColumn"),
        other => panic!("expected UnknownMigration, got {:?}", other),
    }
}

#[tokio::test]
async fn table_prefix_applies_to_all_tables() {
    let pool = memory_pool().await;
    let runner = MigrationRunner::new(pool.clone(), "loom_");
    runner.migrate_up().await.unwrap();

    let columns = column_names(&pool, "loom_workflow_entity").await;
    assert!(columns.contains(&"pin_data".to_string()));
    assert!(column_names(&pool, "workflow_entity").await.is_empty());
}
