//! Backing store capability: executes the SQL the driver and builder produce.

mod pg;
pub use pg::PgStore;

use crate::error::AppError;
use crate::sql::QueryBuf;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Result of a JSON aggregation query: the serialized array, and the aggregated ids when asked for.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Aggregate {
    pub json: String,
    pub ids: Option<String>,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Rows as JSON objects keyed by column alias.
    async fn fetch_rows(&self, q: &QueryBuf) -> Result<Vec<Map<String, Value>>, AppError>;

    /// One aggregation row produced by [`crate::sql::json_aggregate`].
    async fn fetch_aggregate(&self, q: &QueryBuf) -> Result<Aggregate, AppError>;

    /// INSERT/UPDATE/DELETE ... RETURNING; `None` when no row matched.
    async fn execute_returning(&self, q: &QueryBuf) -> Result<Option<Map<String, Value>>, AppError>;
}
