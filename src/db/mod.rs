//! Data store module
//!
//! The execution capability used by the self-correction loop, plus a SQLite
//! implementation with schema introspection and dataset statistics.

pub mod sqlite;

use crate::error::Result;
use crate::models::Row;
use async_trait::async_trait;

pub use sqlite::{ColumnInfo, ForeignKey, SqliteStore, StatQuery, TableSchema};

/// Read-query execution against the relational store.
///
/// Implementations must tolerate concurrent calls from independent
/// sub-question tasks, and must report a rejected query as
/// [`crate::error::EngineError::Store`] carrying the engine's own message.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Engine name, e.g. "sqlite".
    fn name(&self) -> &'static str;

    async fn execute(&self, query: &str) -> Result<Vec<Row>>;
}
