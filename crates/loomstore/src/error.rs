use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Invalid stored workflow {id}: {reason}")]
    InvalidWorkflow { id: String, reason: String },

    #[error("No applied migration to revert")]
    NothingToRevert,

    #[error("Applied migration '{0}' is not known to this build")]
    UnknownMigration(String),
}
