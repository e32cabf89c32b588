//! Workflow persistence
//!
//! SQLite-backed storage for workflow definitions plus the sequential
//! up/down migration system that manages the schema.

mod error;
pub mod migrations;
mod store;

pub use error::StoreError;
pub use migrations::{all_migrations, Migration, MigrationContext, MigrationRunner};
pub use store::{WorkflowStore, WorkflowSummary};

pub type Result<T> = std::result::Result<T, StoreError>;
