//! Standard node library
//!
//! Built-in nodes for common operations plus the service integration
//! nodes (BigQuery, MSG91, Postgres).

mod bigquery;
mod debug;
mod http;
mod msg91;
mod postgres;
mod time;
mod transform;

pub use bigquery::BigQueryGetAllNode;
pub use debug::DebugNode;
pub use http::HttpRequestNode;
pub use msg91::Msg91SmsNode;
pub use postgres::{
    insert_items, InsertPlan, PostgresInsertNode, QueryMode, SqlExecutor,
};
pub use time::DelayNode;
pub use transform::{JsonParseNode, JsonStringifyNode};

use loomruntime::NodeRegistry;
use std::sync::Arc;

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut NodeRegistry) {
    registry.register(Arc::new(bigquery::BigQueryGetAllNodeFactory));
    registry.register(Arc::new(debug::DebugNodeFactory));
    registry.register(Arc::new(http::HttpRequestNodeFactory));
    registry.register(Arc::new(msg91::Msg91SmsNodeFactory));
    registry.register(Arc::new(postgres::PostgresInsertNodeFactory));
    registry.register(Arc::new(time::DelayNodeFactory));
    registry.register(Arc::new(transform::JsonParseNodeFactory));
    registry.register(Arc::new(transform::JsonStringifyNodeFactory));
}
