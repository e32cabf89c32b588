// crates/loomstore/tests/store_test.rs

use loomcore::{NodeSpec, PinData, Value, Workflow};
use loomstore::WorkflowStore;
use std::collections::HashMap;

fn sample_workflow() -> Workflow {
    let mut wf = Workflow::new("http-to-debug");
    wf.description = Some("fetch and log".to_string());
    let http = wf.add_node(
        NodeSpec::new("http.request")
            .with_name("Fetch")
            .with_config("method", "GET"),
    );
    let debug = wf.add_node(NodeSpec::new("debug.log").with_name("Log"));
    wf.connect(http, "body", debug, "message");
    wf
}

#[tokio::test]
async fn save_and_load_round_trip() {
    let store = WorkflowStore::in_memory().await.unwrap();
    let wf = sample_workflow();

    store.save(&wf).await.unwrap();
    let loaded = store.load(wf.id).await.unwrap().unwrap();

    assert_eq!(loaded.id, wf.id);
    assert_eq!(loaded.name, wf.name);
    assert_eq!(loaded.nodes.len(), 2);
    assert_eq!(loaded.connections.len(), 1);
    assert_eq!(loaded.description.as_deref(), Some("fetch and log"));
}

#[tokio::test]
async fn load_missing_workflow_returns_none() {
    let store = WorkflowStore::in_memory().await.unwrap();
    let missing = store.load(uuid::Uuid::new_v4()).await.unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn save_twice_updates_in_place() {
    let store = WorkflowStore::in_memory().await.unwrap();
    let mut wf = sample_workflow();
    store.save(&wf).await.unwrap();

    wf.name = "renamed".to_string();
    wf.active = true;
    store.save(&wf).await.unwrap();

    let summaries = store.list().await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].name, "renamed");
    assert!(summaries[0].active);
}

#[tokio::test]
async fn pin_data_updates_survive_reload() {
    let store = WorkflowStore::in_memory().await.unwrap();
    let wf = sample_workflow();
    let pinned_node = wf.nodes[0].id;
    store.save(&wf).await.unwrap();

    let mut outputs = HashMap::new();
    outputs.insert("body".to_string(), Value::String("fixture".to_string()));
    let mut pin_data = PinData::new();
    pin_data.insert(pinned_node, outputs);

    store.update_pin_data(wf.id, &pin_data).await.unwrap();

    let loaded = store.load(wf.id).await.unwrap().unwrap();
    assert_eq!(
        loaded
            .pin_data
            .get(&pinned_node)
            .and_then(|o| o.get("body")),
        Some(&Value::String("fixture".to_string()))
    );
}

#[tokio::test]
async fn update_pin_data_on_missing_workflow_errors() {
    let store = WorkflowStore::in_memory().await.unwrap();
    let result = store
        .update_pin_data(uuid::Uuid::new_v4(), &PinData::new())
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn trigger_count_increments() {
    let store = WorkflowStore::in_memory().await.unwrap();
    let wf = sample_workflow();
    store.save(&wf).await.unwrap();

    assert_eq!(store.increment_trigger_count(wf.id).await.unwrap(), 1);
    assert_eq!(store.increment_trigger_count(wf.id).await.unwrap(), 2);

    let summaries = store.list().await.unwrap();
    assert_eq!(summaries[0].trigger_count, 2);
}

#[tokio::test]
async fn delete_removes_the_row() {
    let store = WorkflowStore::in_memory().await.unwrap();
    let wf = sample_workflow();
    store.save(&wf).await.unwrap();

    assert!(store.delete(wf.id).await.unwrap());
    assert!(!store.delete(wf.id).await.unwrap());
    assert!(store.list().await.unwrap().is_empty());
}
