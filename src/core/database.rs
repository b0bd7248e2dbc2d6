//! Statement execution seam
//!
//! Both the pooled engine and an open transaction implement [`Executor`]. Every query
//! path in the mapper is written against `&dyn Executor`, so an operation runs on its own
//! pooled connection or inside a caller's transaction without code changes.

use super::error::Result;
use super::value::{DatabaseResult, Value};
use async_trait::async_trait;
use serde::Serialize;

/// Metadata returned alongside raw query rows
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryMetadata {
    /// Statement text as executed
    pub sql: String,
    /// Result column names in statement order
    pub columns: Vec<String>,
    /// Rows changed by the statement (0 for a read-only statement)
    pub rows_affected: u64,
}

/// Something statements can run against
///
/// # Security Warning
///
/// Statement text is passed to SQLite as is. Values that come from callers must always
/// travel in `params`, never be formatted into `sql`.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute a statement that returns no rows; returns the changed row count
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute a SELECT and collect every row
    async fn query(&self, sql: &str, params: &[Value]) -> Result<DatabaseResult>;

    /// Execute an INSERT and return the last inserted row id
    async fn insert(&self, sql: &str, params: &[Value]) -> Result<i64>;

    /// Execute any statement, returning rows (if any) and metadata
    async fn run(&self, sql: &str, params: &[Value]) -> Result<(DatabaseResult, QueryMetadata)>;

    /// Execute several `;`-separated statements without parameters
    async fn execute_batch(&self, sql: &str) -> Result<()>;
}
