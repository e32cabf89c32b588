// crates/loomnodes/tests/postgres_modes_test.rs
//
// Mode-policy tests for the Postgres insert node, run against a scripted
// fake executor so no database is needed.

use async_trait::async_trait;
use loomcore::{NodeError, Value};
use loomnodes::{insert_items, InsertPlan, QueryMode, SqlExecutor};

/// Records every call and fails on scripted item indexes.
struct ScriptedExecutor {
    /// Which insert invocation indexes (0-based) fail
    fail_on: Vec<usize>,
    fail_rollback: bool,
    insert_calls: usize,
    pub log: Vec<String>,
}

impl ScriptedExecutor {
    fn new(fail_on: &[usize]) -> Self {
        Self {
            fail_on: fail_on.to_vec(),
            fail_rollback: false,
            insert_calls: 0,
            log: Vec::new(),
        }
    }

    fn with_failing_rollback(fail_on: &[usize]) -> Self {
        Self {
            fail_rollback: true,
            ..Self::new(fail_on)
        }
    }
}

#[async_trait]
impl SqlExecutor for ScriptedExecutor {
    async fn query(
        &mut self,
        _sql: &str,
        params: &[Option<String>],
    ) -> Result<Vec<serde_json::Value>, NodeError> {
        let call = self.insert_calls;
        self.insert_calls += 1;
        self.log.push(format!("insert#{}", call));

        if self.fail_on.contains(&call) {
            return Err(NodeError::ExecutionFailed(format!(
                "duplicate key on call {}",
                call
            )));
        }

        // Echo the bound id back as the inserted row
        let id = params
            .first()
            .and_then(|p| p.as_deref())
            .unwrap_or("?")
            .to_string();
        Ok(vec![serde_json::json!({ "id": id })])
    }

    async fn begin(&mut self) -> Result<(), NodeError> {
        self.log.push("begin".to_string());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), NodeError> {
        self.log.push("commit".to_string());
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), NodeError> {
        self.log.push("rollback".to_string());
        if self.fail_rollback {
            return Err(NodeError::ExecutionFailed(
                "connection lost during rollback".to_string(),
            ));
        }
        Ok(())
    }
}

fn plan() -> InsertPlan {
    InsertPlan::parse("public", "users", "id:int", "*").unwrap()
}

fn rows(n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| Value::from_json(serde_json::json!({ "id": i })))
        .collect()
}

#[tokio::test]
async fn transaction_failure_without_continue_on_fail_discards_everything() {
    let mut exec = ScriptedExecutor::new(&[1]);

    let result = insert_items(QueryMode::Transaction, &plan(), &rows(4), false, &mut exec).await;

    assert!(result.is_err());
    // Item 2 and 3 were never attempted, and the transaction rolled back
    assert_eq!(
        exec.log,
        vec!["begin", "insert#0", "insert#1", "rollback"]
    );
}

#[tokio::test]
async fn transaction_failure_with_continue_on_fail_returns_partial_results() {
    let mut exec = ScriptedExecutor::new(&[1]);

    let result = insert_items(QueryMode::Transaction, &plan(), &rows(4), true, &mut exec)
        .await
        .unwrap();

    // Items up to the failure, plus the failure record itself
    assert_eq!(result.len(), 2);
    assert_eq!(result[0], serde_json::json!({ "id": "0" }));
    assert_eq!(result[1]["item"], serde_json::json!(1));
    assert!(result[1]["error"]
        .as_str()
        .unwrap()
        .contains("duplicate key"));

    // Remaining items aborted
    assert_eq!(
        exec.log,
        vec!["begin", "insert#0", "insert#1", "rollback"]
    );
}

#[tokio::test]
async fn failed_rollback_does_not_displace_the_insert_error() {
    let mut exec = ScriptedExecutor::with_failing_rollback(&[1]);

    let err = insert_items(QueryMode::Transaction, &plan(), &rows(3), false, &mut exec)
        .await
        .unwrap_err();

    // The insert failure is what the caller sees, not the rollback failure
    assert!(err.to_string().contains("duplicate key"));
}

#[tokio::test]
async fn failed_rollback_still_returns_partial_results_with_continue_on_fail() {
    let mut exec = ScriptedExecutor::with_failing_rollback(&[1]);

    let result = insert_items(QueryMode::Transaction, &plan(), &rows(3), true, &mut exec)
        .await
        .unwrap();

    assert_eq!(result.len(), 2);
    assert_eq!(result[0], serde_json::json!({ "id": "0" }));
    assert_eq!(result[1]["item"], serde_json::json!(1));
}

#[tokio::test]
async fn transaction_success_commits_all_rows() {
    let mut exec = ScriptedExecutor::new(&[]);

    let result = insert_items(QueryMode::Transaction, &plan(), &rows(3), false, &mut exec)
        .await
        .unwrap();

    assert_eq!(result.len(), 3);
    assert_eq!(exec.log.first().map(String::as_str), Some("begin"));
    assert_eq!(exec.log.last().map(String::as_str), Some("commit"));
}

#[tokio::test]
async fn independent_failure_never_affects_later_items() {
    let mut exec = ScriptedExecutor::new(&[1]);

    let result = insert_items(QueryMode::Independently, &plan(), &rows(4), true, &mut exec)
        .await
        .unwrap();

    // All four items accounted for: three inserts and one failure record
    assert_eq!(result.len(), 4);
    assert_eq!(result[0], serde_json::json!({ "id": "0" }));
    assert_eq!(result[1]["item"], serde_json::json!(1));
    assert_eq!(result[2], serde_json::json!({ "id": "2" }));
    assert_eq!(result[3], serde_json::json!({ "id": "3" }));

    // No transaction bracketing in independent mode
    assert!(!exec.log.contains(&"begin".to_string()));
    assert_eq!(exec.insert_calls, 4);
}

#[tokio::test]
async fn independent_failure_without_continue_on_fail_raises() {
    let mut exec = ScriptedExecutor::new(&[2]);

    let result =
        insert_items(QueryMode::Independently, &plan(), &rows(4), false, &mut exec).await;

    assert!(result.is_err());
    assert_eq!(exec.insert_calls, 3);
}

#[tokio::test]
async fn multiple_mode_issues_a_single_statement() {
    let mut exec = ScriptedExecutor::new(&[]);

    let result = insert_items(QueryMode::Multiple, &plan(), &rows(5), false, &mut exec)
        .await
        .unwrap();

    assert_eq!(exec.insert_calls, 1);
    // The fake returns one row per call; the real executor returns one per
    // inserted row, so only the call count matters here
    assert_eq!(result.len(), 1);
}

#[tokio::test]
async fn multiple_mode_failure_fails_the_whole_batch() {
    let mut exec = ScriptedExecutor::new(&[0]);

    let result = insert_items(QueryMode::Multiple, &plan(), &rows(5), true, &mut exec).await;

    // continue_on_fail does not apply item-wise in batched mode
    assert!(result.is_err());
}

#[tokio::test]
async fn empty_batch_is_a_no_op() {
    let mut exec = ScriptedExecutor::new(&[]);

    let result = insert_items(QueryMode::Transaction, &plan(), &[], false, &mut exec)
        .await
        .unwrap();

    assert!(result.is_empty());
    assert!(exec.log.is_empty());
}
