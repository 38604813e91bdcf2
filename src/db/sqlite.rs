//! SQLite Data Store
//!
//! Every call opens its own read-only connection on the blocking pool, so
//! concurrent sub-questions never queue behind a shared handle. Dropping a
//! call (deadline or task abort) interrupts its statement.

use crate::db::DataStore;
use crate::error::{EngineError, Result};
use crate::models::Row;
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<ColumnInfo>,
    pub foreign_keys: Vec<ForeignKey>,
    pub indexes: Vec<String>,
}

/// A named scalar statistic reported by [`SqliteStore::stats`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatQuery {
    pub name: String,
    pub query: String,
}

impl StatQuery {
    pub fn new(name: &str, query: &str) -> Self {
        Self {
            name: name.to_string(),
            query: query.to_string(),
        }
    }

    /// Headline numbers for the churn dataset.
    pub fn churn_defaults() -> Vec<Self> {
        vec![
            Self::new("total_accounts", "SELECT COUNT(*) AS count FROM account"),
            Self::new(
                "active_subscriptions",
                "SELECT COUNT(*) AS count FROM subscription WHERE end_date IS NULL",
            ),
            Self::new(
                "churned_subscriptions",
                "SELECT COUNT(*) AS count FROM subscription WHERE end_date IS NOT NULL",
            ),
            Self::new(
                "total_mrr",
                "SELECT COALESCE(ROUND(SUM(mrr), 2), 0) AS total FROM subscription WHERE end_date IS NULL",
            ),
            Self::new("total_events", "SELECT COUNT(*) AS count FROM event"),
            Self::new("total_metrics", "SELECT COUNT(*) AS count FROM metric"),
        ]
    }
}

/// VM instructions between cancellation checks.
const PROGRESS_INTERVAL_OPS: i32 = 1000;

/// Raises its flag when dropped before [`CancelOnDrop::disarm`].
struct CancelOnDrop {
    flag: Arc<AtomicBool>,
    armed: bool,
}

impl CancelOnDrop {
    fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            armed: true,
        }
    }

    fn flag(&self) -> Arc<AtomicBool> {
        self.flag.clone()
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            debug!("Store call dropped, interrupting statement");
            self.flag.store(true, Ordering::Relaxed);
        }
    }
}

pub struct SqliteStore {
    path: PathBuf,
    stat_queries: Vec<StatQuery>,
}

impl SqliteStore {
    /// Open a store over an existing database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(EngineError::Store(format!(
                "Database file not found: {}",
                path.display()
            )));
        }
        Ok(Self {
            path,
            stat_queries: StatQuery::churn_defaults(),
        })
    }

    pub fn with_stat_queries(mut self, stat_queries: Vec<StatQuery>) -> Self {
        self.stat_queries = stat_queries;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against a fresh read-only connection on the blocking pool.
    /// If the returned future is dropped first, the statement is interrupted
    /// at its next progress check.
    async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        let guard = CancelOnDrop::new();
        let cancelled = guard.flag();
        let result = tokio::task::spawn_blocking(move || {
            let conn = Connection::open_with_flags(
                &path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .map_err(|e| EngineError::Store(e.to_string()))?;
            conn.progress_handler(
                PROGRESS_INTERVAL_OPS,
                Some(move || cancelled.load(Ordering::Relaxed)),
            );
            f(&conn)
        })
        .await;
        guard.disarm();
        result.map_err(|e| EngineError::Store(format!("Query task failed: {}", e)))?
    }

    pub async fn list_tables(&self) -> Result<Vec<String>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )?;
            let tables = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(tables)
        })
        .await
    }

    pub async fn table_schema(&self, table: &str) -> Result<TableSchema> {
        let table = table.to_string();
        self.with_connection(move |conn| read_table_schema(conn, &table)).await
    }

    pub async fn sample_rows(&self, table: &str, limit: usize) -> Result<Vec<Row>> {
        let query = format!("SELECT * FROM {} LIMIT {}", quote_identifier(table), limit);
        self.execute(&query).await
    }

    /// Check that a query compiles without running it.
    pub async fn validate(&self, query: &str) -> Result<()> {
        let query = format!("EXPLAIN {}", query);
        self.with_connection(move |conn| {
            conn.prepare(&query)
                .map(|_| ())
                .map_err(|e| EngineError::Store(e.to_string()))
        })
        .await
    }

    /// Per-table columns, keys, indexes and one sample row.
    pub async fn schema(&self) -> Result<serde_json::Map<String, Value>> {
        let mut schema = serde_json::Map::new();
        for table in self.list_tables().await? {
            let table_schema = self.table_schema(&table).await?;
            let sample = self.sample_rows(&table, 1).await.unwrap_or_else(|e| {
                warn!(table = %table, error = %e, "Failed to sample table");
                Vec::new()
            });
            schema.insert(
                table,
                serde_json::json!({
                    "columns": table_schema.columns,
                    "foreign_keys": table_schema.foreign_keys,
                    "indexes": table_schema.indexes,
                    "sample_data": sample,
                    "sample_count": sample.len(),
                }),
            );
        }
        Ok(schema)
    }

    /// Scalar statistics; a statistic whose query fails is left out.
    pub async fn stats(&self) -> serde_json::Map<String, Value> {
        let mut stats = serde_json::Map::new();
        for stat in &self.stat_queries {
            match self.execute(&stat.query).await {
                Ok(rows) => {
                    let value = rows
                        .first()
                        .and_then(|row| row.values().next().cloned())
                        .unwrap_or(Value::from(0));
                    stats.insert(stat.name.clone(), value);
                }
                Err(e) => warn!(stat = %stat.name, error = %e, "Failed to compute statistic"),
            }
        }
        stats
    }
}

#[async_trait]
impl DataStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn execute(&self, query: &str) -> Result<Vec<Row>> {
        let start = Instant::now();
        let query_owned = query.to_string();
        let rows = self
            .with_connection(move |conn| run_query(conn, &query_owned))
            .await?;
        debug!(
            rows = rows.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Query executed"
        );
        Ok(rows)
    }
}

fn run_query(conn: &Connection, query: &str) -> Result<Vec<Row>> {
    let store_err = |e: rusqlite::Error| EngineError::Store(e.to_string());
    let mut stmt = conn.prepare(query).map_err(store_err)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let mut rows = stmt.query([]).map_err(store_err)?;

    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(store_err)? {
        let mut record = Row::new();
        for (idx, name) in columns.iter().enumerate() {
            let value = row.get_ref(idx).map_err(store_err)?;
            record.insert(name.clone(), to_json(value));
        }
        out.push(record);
    }
    Ok(out)
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("<{} bytes>", bytes.len())),
    }
}

fn read_table_schema(conn: &Connection, table: &str) -> Result<TableSchema> {
    let mut stmt = conn.prepare(
        "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1)",
    )?;
    let columns = stmt
        .query_map(params![table], |row| {
            Ok(ColumnInfo {
                name: row.get(0)?,
                data_type: row.get(1)?,
                not_null: row.get::<_, i64>(2)? != 0,
                default_value: row.get(3)?,
                primary_key: row.get::<_, i64>(4)? != 0,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if columns.is_empty() {
        return Err(EngineError::Store(format!("no such table: {}", table)));
    }

    let mut stmt =
        conn.prepare("SELECT \"from\", \"table\", \"to\" FROM pragma_foreign_key_list(?1)")?;
    let foreign_keys = stmt
        .query_map(params![table], |row| {
            Ok(ForeignKey {
                column: row.get(0)?,
                references_table: row.get(1)?,
                references_column: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare("SELECT name FROM pragma_index_list(?1)")?;
    let indexes = stmt
        .query_map(params![table], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(TableSchema {
        table: table.to_string(),
        columns,
        foreign_keys,
        indexes,
    })
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("churn.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE account (id INTEGER PRIMARY KEY, country TEXT NOT NULL, score REAL);
             CREATE TABLE subscription (
                 account_id INTEGER REFERENCES account(id),
                 product TEXT, mrr REAL, end_date TEXT);
             CREATE INDEX idx_sub_account ON subscription(account_id);
             INSERT INTO account VALUES (1, 'USA', 0.25), (2, 'UK', 1.5), (3, 'USA', NULL);
             INSERT INTO subscription VALUES (1, 'Basic', 10.5, NULL), (2, 'Premium', 99.99, '2024-03-01');",
        )
        .unwrap();
        drop(conn);
        let store = SqliteStore::open(&path)
            .unwrap()
            .with_stat_queries(vec![
                StatQuery::new("total_accounts", "SELECT COUNT(*) AS count FROM account"),
                StatQuery::new("total_events", "SELECT COUNT(*) FROM event"),
            ]);
        (dir, store)
    }

    #[tokio::test]
    async fn test_execute_preserves_column_order_and_types() {
        let (_dir, store) = fixture();
        let rows = store
            .execute("SELECT country, COUNT(*) AS n, MAX(score) AS top FROM account GROUP BY country ORDER BY country")
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        let keys: Vec<_> = rows[0].keys().cloned().collect();
        assert_eq!(keys, vec!["country", "n", "top"]);
        assert_eq!(rows[0]["country"], "UK");
        assert_eq!(rows[0]["n"], 1);
        assert_eq!(rows[0]["top"], 1.5);
        assert_eq!(rows[1]["top"], 0.25);
    }

    #[tokio::test]
    async fn test_errors_are_verbatim() {
        let (_dir, store) = fixture();
        let err = store.execute("SELECT * FROM nope").await.unwrap_err();
        match err {
            EngineError::Store(message) => assert!(message.contains("no such table: nope")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_store_is_read_only() {
        let (_dir, store) = fixture();
        let err = store.execute("DELETE FROM account").await.unwrap_err();
        assert!(matches!(err, EngineError::Store(_)));
        let rows = store.execute("SELECT COUNT(*) AS c FROM account").await.unwrap();
        assert_eq!(rows[0]["c"], 3);
    }

    #[tokio::test]
    async fn test_introspection() {
        let (_dir, store) = fixture();
        assert_eq!(store.list_tables().await.unwrap(), vec!["account", "subscription"]);

        let schema = store.table_schema("subscription").await.unwrap();
        assert_eq!(schema.columns.len(), 4);
        assert_eq!(schema.foreign_keys[0].references_table, "account");
        assert_eq!(schema.indexes, vec!["idx_sub_account"]);

        let account = store.table_schema("account").await.unwrap();
        assert!(account.columns[0].primary_key);
        assert!(account.columns[1].not_null);

        assert!(store.validate("SELECT id FROM account").await.is_ok());
        assert!(store.validate("SELECT nope FROM account").await.is_err());

        let full = store.schema().await.unwrap();
        assert_eq!(full["account"]["sample_count"], 1);
    }

    #[tokio::test]
    async fn test_stats_skip_failing_queries() {
        let (_dir, store) = fixture();
        let stats = store.stats().await;
        assert_eq!(stats["total_accounts"], 3);
        assert!(!stats.contains_key("total_events"));
    }

    const RUNAWAY_QUERY: &str = "WITH RECURSIVE c(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM c WHERE n < 200000000) SELECT SUM(n) AS total FROM c";

    /// Dropping a runtime waits for its blocking work, so a quick shutdown
    /// means no statement outlived its caller.
    fn assert_shuts_down_promptly(runtime: tokio::runtime::Runtime) {
        let started = Instant::now();
        drop(runtime);
        assert!(
            started.elapsed() < std::time::Duration::from_secs(2),
            "statement kept running for {:?} after its caller went away",
            started.elapsed()
        );
    }

    #[test]
    fn test_timed_out_query_stops_running() {
        let (_dir, store) = fixture();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let err = runtime
            .block_on(crate::error::with_timeout(
                std::time::Duration::from_millis(100),
                "query execution",
                store.execute(RUNAWAY_QUERY),
            ))
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout(..)));
        assert_shuts_down_promptly(runtime);
    }

    #[test]
    fn test_aborted_task_interrupts_its_statement() {
        let (_dir, store) = fixture();
        let store = Arc::new(store);
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async move {
            let runaway = tokio::spawn(async move { store.execute(RUNAWAY_QUERY).await });
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            runaway.abort();
            assert!(runaway.await.unwrap_err().is_cancelled());
        });
        assert_shuts_down_promptly(runtime);
    }

    #[tokio::test]
    async fn test_completed_query_is_not_interrupted() {
        let (_dir, store) = fixture();
        let rows = store
            .execute("WITH RECURSIVE c(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM c WHERE n < 100000) SELECT SUM(n) AS total FROM c")
            .await
            .unwrap();
        assert_eq!(rows[0]["total"], 5000050000i64);
    }

    #[tokio::test]
    async fn test_concurrent_reads() {
        let (_dir, store) = fixture();
        let store = Arc::new(store);
        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.execute("SELECT COUNT(*) AS c FROM subscription").await
            }));
        }
        for handle in handles {
            let rows = handle.await.unwrap().unwrap();
            assert_eq!(rows[0]["c"], 2);
        }
    }
}
