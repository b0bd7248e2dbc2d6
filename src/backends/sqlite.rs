//! Pooled SQLite storage engine
//!
//! Connections are managed by deadpool and every statement runs on a blocking thread
//! through `interact`, bounded by the configured operation timeout. A connection is
//! prepared on each checkout: a transaction left open by a dropped handle is rolled back
//! and the foreign-key pragma is applied.

use super::transaction::Transaction;
use crate::core::config::EngineConfig;
use crate::core::database::{Executor, QueryMetadata};
use crate::core::error::{DatabaseError, Result};
use crate::core::value::{DatabaseResult, DatabaseRow, Value};
use async_trait::async_trait;
use deadpool_sqlite::{Config, Object, Pool, PoolConfig, Runtime};
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        use rusqlite::types::Value as SqlValue;

        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Bool(v) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*v))),
            Value::Integer(v) => ToSqlOutput::Owned(SqlValue::Integer(*v)),
            Value::Real(v) => ToSqlOutput::Owned(SqlValue::Real(*v)),
            Value::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Value::Blob(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
        })
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(v) => Value::Integer(v),
            ValueRef::Real(v) => Value::Real(v),
            ValueRef::Text(v) => Value::Text(String::from_utf8_lossy(v).into_owned()),
            ValueRef::Blob(v) => Value::Blob(v.to_vec()),
        }
    }
}

/// Convert a rusqlite row to a `DatabaseRow`
fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DatabaseRow> {
    let mut db_row = DatabaseRow::new();
    let column_count = row.as_ref().column_count();

    for i in 0..column_count {
        let column_name = row.as_ref().column_name(i)?.to_string();
        db_row.insert(column_name, Value::from(row.get_ref(i)?));
    }

    Ok(db_row)
}

pub(crate) fn run_execute(conn: &Connection, sql: &str, params: &[Value]) -> rusqlite::Result<u64> {
    let mut stmt = conn.prepare(sql)?;
    let affected = stmt.execute(params_from_iter(params.iter()))?;
    Ok(affected as u64)
}

pub(crate) fn run_query(
    conn: &Connection,
    sql: &str,
    params: &[Value],
) -> rusqlite::Result<DatabaseResult> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(params.iter()), read_row)?;

    let mut results = Vec::new();
    for row_result in rows {
        results.push(row_result?);
    }
    Ok(results)
}

pub(crate) fn run_insert(conn: &Connection, sql: &str, params: &[Value]) -> rusqlite::Result<i64> {
    let mut stmt = conn.prepare(sql)?;
    stmt.execute(params_from_iter(params.iter()))?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn run_any(
    conn: &Connection,
    sql: &str,
    params: &[Value],
) -> rusqlite::Result<(DatabaseResult, QueryMetadata)> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let readonly = stmt.readonly();

    let rows = if columns.is_empty() {
        stmt.execute(params_from_iter(params.iter()))?;
        Vec::new()
    } else {
        let mut rows = Vec::new();
        let mapped = stmt.query_map(params_from_iter(params.iter()), read_row)?;
        for row_result in mapped {
            rows.push(row_result?);
        }
        rows
    };
    let rows_affected = if readonly { 0 } else { conn.changes() as u64 };

    Ok((
        rows,
        QueryMetadata {
            sql: sql.to_string(),
            columns,
            rows_affected,
        },
    ))
}

/// Run blocking work on a pooled connection, bounded by `timeout`
pub(crate) async fn interact<F, R>(conn: &Object, timeout: Duration, work: F) -> Result<R>
where
    F: FnOnce(&mut Connection) -> rusqlite::Result<R> + Send + 'static,
    R: Send + 'static,
{
    tokio::time::timeout(timeout, conn.interact(work))
        .await
        .map_err(|_| DatabaseError::query_timeout(timeout.as_millis() as u64))?
        .map_err(|e| DatabaseError::other(format!("Interact error: {}", e)))?
        .map_err(DatabaseError::from)
}

/// Statement log line; info level when statement logging is on
pub(crate) fn log_statement(logging: bool, sql: &str, params: &[Value]) {
    if logging {
        info!(target: "rust_orm_system::sql", ?params, "{}", sql);
    } else {
        trace!(target: "rust_orm_system::sql", ?params, "{}", sql);
    }
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Maximum number of connections
    pub max_size: usize,
    /// Total number of connections in the pool
    pub size: usize,
    /// Number of available connections
    pub available: usize,
    /// Number of requests waiting for a connection
    pub waiting: usize,
}

/// Pooled SQLite engine
///
/// # Example
///
/// ```no_run
/// use rust_orm_system::backends::SqliteEngine;
/// use rust_orm_system::core::config::EngineConfig;
/// use rust_orm_system::core::database::Executor;
///
/// # async fn example() -> rust_orm_system::core::Result<()> {
/// let engine = SqliteEngine::connect(EngineConfig::sqlite("database.sqlite")).await?;
/// let rows = engine.query("SELECT 1 AS one", &[]).await?;
/// assert_eq!(rows.len(), 1);
/// # Ok(())
/// # }
/// ```
pub struct SqliteEngine {
    pool: Pool,
    config: EngineConfig,
}

impl SqliteEngine {
    /// Create the pool, authenticate and open the minimum number of connections
    ///
    /// # Errors
    ///
    /// `UnsupportedOperation` for a dialect other than SQLite; connectivity errors when the
    /// database cannot be opened. Startup failures are reported, not retried.
    pub async fn connect(config: EngineConfig) -> Result<Self> {
        if !config.dialect.is_supported() {
            return Err(DatabaseError::unsupported(format!(
                "dialect '{}' has no storage engine; only sqlite is available",
                config.dialect
            )));
        }

        let mut max_size = config.pool.max.max(1);
        if config.is_in_memory() && max_size > 1 {
            warn!(
                requested = max_size,
                "in-memory databases are private to one connection; clamping pool to 1"
            );
            max_size = 1;
        }

        let mut pool_config = Config::new(&config.storage);
        pool_config.pool = Some(PoolConfig::new(max_size));
        let pool = pool_config
            .create_pool(Runtime::Tokio1)
            .map_err(|e| DatabaseError::connectivity(format!("Failed to create pool: {}", e)))?;

        let engine = Self { pool, config };
        engine.initialize().await?;
        engine.authenticate().await?;
        engine.warm_up(max_size).await?;

        info!(
            storage = %engine.config.storage,
            max = max_size,
            "Connection has been established successfully"
        );
        Ok(engine)
    }

    async fn initialize(&self) -> Result<()> {
        if self.config.is_in_memory() {
            return Ok(());
        }
        let conn = self.acquire().await?;
        interact(&conn, self.config.operation_timeout(), |conn| {
            // PRAGMA journal_mode returns a value, so we need to use query_row
            conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
        })
        .await
    }

    async fn warm_up(&self, max_size: usize) -> Result<()> {
        let min = self.config.pool.min.min(max_size);
        let mut held = Vec::with_capacity(min);
        for _ in 0..min {
            held.push(self.acquire().await?);
        }
        debug!(opened = held.len(), "pool warmed up");
        Ok(())
    }

    /// Check that a connection can be acquired and answers a trivial query
    pub async fn authenticate(&self) -> Result<()> {
        let conn = self.acquire().await?;
        interact(&conn, self.config.operation_timeout(), |conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
        })
        .await?;
        Ok(())
    }

    /// Check out a connection, prepared for use
    pub(crate) async fn acquire(&self) -> Result<Object> {
        let acquire_timeout = self.config.pool.acquire_timeout();
        let conn = tokio::time::timeout(acquire_timeout, self.pool.get())
            .await
            .map_err(|_| DatabaseError::connection_timeout(acquire_timeout.as_millis() as u64))?
            .map_err(|e| match e {
                deadpool_sqlite::PoolError::Backend(err) => DatabaseError::from(err),
                other => {
                    DatabaseError::connectivity(format!("Failed to acquire connection: {}", other))
                }
            })?;

        let enforce = self.config.enforce_foreign_keys;
        let abandoned = interact(&conn, self.config.operation_timeout(), move |conn| {
            let abandoned = !conn.is_autocommit();
            if abandoned {
                conn.execute_batch("ROLLBACK")?;
            }
            conn.pragma_update(None, "foreign_keys", enforce)?;
            Ok(abandoned)
        })
        .await?;
        if abandoned {
            warn!("rolled back a transaction left open on a pooled connection");
        }
        Ok(conn)
    }

    /// Begin a transaction on a dedicated connection
    pub async fn begin(&self) -> Result<Transaction> {
        let conn = self.acquire().await?;
        Transaction::begin(conn, self.config.operation_timeout(), self.config.logging).await
    }

    /// Release idle connections older than the idle timeout; returns how many were closed
    pub fn reap_idle(&self) -> usize {
        let idle = self.config.pool.idle_timeout();
        let result = self.pool.retain(|_, metrics| metrics.last_used() < idle);
        if !result.removed.is_empty() {
            debug!(released = result.removed.len(), "released idle connections");
        }
        result.removed.len()
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let status = self.pool.status();
        PoolStats {
            max_size: status.max_size,
            size: status.size,
            available: status.available,
            waiting: status.waiting,
        }
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Close the pool; later operations fail with a connectivity error
    pub fn close(&self) {
        self.pool.close();
        info!(storage = %self.config.storage, "connection pool closed");
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

#[async_trait]
impl Executor for SqliteEngine {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        log_statement(self.config.logging, sql, params);
        let conn = self.acquire().await?;
        let (sql, params) = (sql.to_string(), params.to_vec());
        interact(&conn, self.config.operation_timeout(), move |conn| {
            run_execute(conn, &sql, &params)
        })
        .await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<DatabaseResult> {
        log_statement(self.config.logging, sql, params);
        let conn = self.acquire().await?;
        let (sql, params) = (sql.to_string(), params.to_vec());
        interact(&conn, self.config.operation_timeout(), move |conn| {
            run_query(conn, &sql, &params)
        })
        .await
    }

    async fn insert(&self, sql: &str, params: &[Value]) -> Result<i64> {
        log_statement(self.config.logging, sql, params);
        let conn = self.acquire().await?;
        let (sql, params) = (sql.to_string(), params.to_vec());
        interact(&conn, self.config.operation_timeout(), move |conn| {
            run_insert(conn, &sql, &params)
        })
        .await
    }

    async fn run(&self, sql: &str, params: &[Value]) -> Result<(DatabaseResult, QueryMetadata)> {
        log_statement(self.config.logging, sql, params);
        let conn = self.acquire().await?;
        let (sql, params) = (sql.to_string(), params.to_vec());
        interact(&conn, self.config.operation_timeout(), move |conn| {
            run_any(conn, &sql, &params)
        })
        .await
    }

    async fn execute_batch(&self, sql: &str) -> Result<()> {
        log_statement(self.config.logging, sql, &[]);
        let conn = self.acquire().await?;
        let sql = sql.to_string();
        interact(&conn, self.config.operation_timeout(), move |conn| {
            conn.execute_batch(&sql)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::database_types::DatabaseType;
    use crate::core::error::StorageErrorKind;

    async fn memory_engine() -> SqliteEngine {
        SqliteEngine::connect(EngineConfig::default()).await.unwrap()
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_statement_log_carries_params() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            log_statement(
                false,
                "SELECT * FROM players WHERE name = ?",
                &[Value::from("john")],
            );
        });

        let output = String::from_utf8(captured.0.lock().clone()).unwrap();
        assert!(output.contains("SELECT * FROM players WHERE name = ?"));
        assert!(output.contains("john"));
    }

    #[tokio::test]
    async fn test_connect_clamps_memory_pool() {
        let engine = memory_engine().await;
        assert_eq!(engine.stats().max_size, 1);
        engine.authenticate().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_other_dialects() {
        let config = EngineConfig {
            dialect: DatabaseType::Postgres,
            ..Default::default()
        };
        let err = SqliteEngine::connect(config).await.err().unwrap();
        assert!(matches!(err, DatabaseError::UnsupportedOperation(_)));
    }

    #[tokio::test]
    async fn test_execute_insert_query() -> Result<()> {
        let engine = memory_engine().await;
        engine
            .execute_batch("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT, flag TINYINT(1))")
            .await?;

        let id = engine
            .insert(
                "INSERT INTO test (name, flag) VALUES (?, ?)",
                &[Value::from("Alice"), Value::Bool(true)],
            )
            .await?;
        assert_eq!(id, 1);

        let affected = engine
            .execute(
                "UPDATE test SET name = ? WHERE id = ?",
                &[Value::from("Bob"), Value::from(id)],
            )
            .await?;
        assert_eq!(affected, 1);

        let rows = engine.query("SELECT * FROM test", &[]).await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&Value::from("Bob")));
        assert_eq!(rows[0].get("flag"), Some(&Value::Integer(1)));
        Ok(())
    }

    #[tokio::test]
    async fn test_run_reports_metadata() -> Result<()> {
        let engine = memory_engine().await;
        engine
            .execute_batch("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT)")
            .await?;

        let (rows, meta) = engine
            .run("INSERT INTO test (name) VALUES ('a'), ('b')", &[])
            .await?;
        assert!(rows.is_empty());
        assert_eq!(meta.rows_affected, 2);

        let (rows, meta) = engine.run("SELECT id, name FROM test;", &[]).await?;
        assert_eq!(rows.len(), 2);
        assert_eq!(meta.sql, "SELECT id, name FROM test;");
        assert_eq!(meta.columns, vec!["id", "name"]);
        assert_eq!(meta.rows_affected, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_query_error_is_tagged() {
        let engine = memory_engine().await;
        let err = engine.query("SELECT * FROM missing", &[]).await.unwrap_err();
        assert_eq!(err.storage_kind(), Some(StorageErrorKind::Query));
    }

    #[tokio::test]
    async fn test_warm_up_and_reap_idle() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.sqlite");
        let config = EngineConfig::sqlite(path.to_string_lossy())
            .with_pool(5, 2, Duration::ZERO);
        let engine = SqliteEngine::connect(config).await?;
        assert_eq!(engine.stats().max_size, 5);
        assert_eq!(engine.stats().size, 2);

        assert_eq!(engine.reap_idle(), 2);
        assert_eq!(engine.stats().size, 0);

        // New connections are opened on demand
        engine.authenticate().await?;
        assert_eq!(engine.stats().size, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_close() {
        let engine = memory_engine().await;
        engine.close();
        assert!(engine.is_closed());
        assert!(engine.query("SELECT 1", &[]).await.is_err());
    }
}
