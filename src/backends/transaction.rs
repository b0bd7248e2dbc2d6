//! Transaction handle bound to one pooled connection
//!
//! A [`Transaction`] keeps its connection checked out for its whole lifetime, so every
//! statement issued through the handle sees the transaction's own writes. Clones share the
//! same connection; statements are serialized in issue order by an async mutex.

use super::sqlite::{interact, log_statement, run_any, run_execute, run_insert, run_query};
use crate::core::database::{Executor, QueryMetadata};
use crate::core::error::{DatabaseError, Result};
use crate::core::value::{DatabaseResult, Value};
use async_trait::async_trait;
use deadpool_sqlite::Object;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Statements may be issued
    Active,
    /// Committed; the handle is closed
    Committed,
    /// Rolled back; the handle is closed
    RolledBack,
}

struct Inner {
    id: u64,
    connection: tokio::sync::Mutex<Option<Object>>,
    state: Mutex<TransactionState>,
    operation_timeout: Duration,
    logging: bool,
}

/// Handle to an open transaction
///
/// # Automatic Rollback
///
/// If the last clone is dropped while the transaction is still active, a rollback is
/// issued on the runtime. Without a runtime the connection goes back to the pool with the
/// transaction open and is rolled back on its next checkout.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Transaction {
    /// Begin a transaction on an already acquired connection
    ///
    /// `BEGIN IMMEDIATE` takes the write lock up front so two transactions never deadlock
    /// upgrading from a read lock.
    pub(crate) async fn begin(
        conn: Object,
        operation_timeout: Duration,
        logging: bool,
    ) -> Result<Self> {
        log_statement(logging, "BEGIN IMMEDIATE", &[]);
        interact(&conn, operation_timeout, |conn| {
            conn.execute_batch("BEGIN IMMEDIATE")
        })
        .await?;

        let id = NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed);
        debug!(transaction = id, "transaction started");
        Ok(Self {
            inner: Arc::new(Inner {
                id,
                connection: tokio::sync::Mutex::new(Some(conn)),
                state: Mutex::new(TransactionState::Active),
                operation_timeout,
                logging,
            }),
        })
    }

    /// Process-unique transaction id, used in logs
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Current state
    pub fn state(&self) -> TransactionState {
        *self.inner.state.lock()
    }

    /// Whether statements may still be issued
    pub fn is_active(&self) -> bool {
        self.state() == TransactionState::Active
    }

    /// Commit and release the connection
    ///
    /// # Errors
    ///
    /// `TransactionError` if the handle is already closed. If `COMMIT` itself fails the
    /// transaction is rolled back and the commit error is returned.
    pub async fn commit(&self) -> Result<()> {
        self.finish("COMMIT", TransactionState::Committed).await
    }

    /// Roll back and release the connection
    ///
    /// # Errors
    ///
    /// `TransactionError` if the handle is already closed.
    pub async fn rollback(&self) -> Result<()> {
        self.finish("ROLLBACK", TransactionState::RolledBack).await
    }

    async fn finish(&self, statement: &'static str, next: TransactionState) -> Result<()> {
        let mut guard = self.inner.connection.lock().await;
        self.check_active()?;
        let conn = guard
            .take()
            .ok_or_else(|| DatabaseError::transaction("Transaction connection missing"))?;

        log_statement(self.inner.logging, statement, &[]);
        let outcome = interact(&conn, self.inner.operation_timeout, move |conn| {
            conn.execute_batch(statement)
        })
        .await;

        match outcome {
            Ok(()) => {
                *self.inner.state.lock() = next;
                debug!(transaction = self.inner.id, state = ?next, "transaction finished");
                Ok(())
            }
            Err(err) => {
                if next == TransactionState::Committed {
                    let rollback = interact(&conn, self.inner.operation_timeout, |conn| {
                        conn.execute_batch("ROLLBACK")
                    })
                    .await;
                    if let Err(rollback_err) = rollback {
                        warn!(
                            transaction = self.inner.id,
                            error = %rollback_err,
                            "rollback after failed commit failed"
                        );
                    }
                }
                *self.inner.state.lock() = TransactionState::RolledBack;
                Err(err)
            }
        }
    }

    fn check_active(&self) -> Result<()> {
        match self.state() {
            TransactionState::Active => Ok(()),
            _ => Err(DatabaseError::transaction("Transaction already finalized")),
        }
    }

    async fn with_connection<F, R>(&self, sql: &str, params: &[Value], work: F) -> Result<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let guard = self.inner.connection.lock().await;
        self.check_active()?;
        let conn = guard
            .as_ref()
            .ok_or_else(|| DatabaseError::transaction("Transaction already finalized"))?;
        log_statement(self.inner.logging, sql, params);
        interact(conn, self.inner.operation_timeout, work).await
    }
}

#[async_trait]
impl Executor for Transaction {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let (owned_sql, owned_params) = (sql.to_string(), params.to_vec());
        self.with_connection(sql, params, move |conn| {
            run_execute(conn, &owned_sql, &owned_params)
        })
        .await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<DatabaseResult> {
        let (owned_sql, owned_params) = (sql.to_string(), params.to_vec());
        self.with_connection(sql, params, move |conn| {
            run_query(conn, &owned_sql, &owned_params)
        })
        .await
    }

    async fn insert(&self, sql: &str, params: &[Value]) -> Result<i64> {
        let (owned_sql, owned_params) = (sql.to_string(), params.to_vec());
        self.with_connection(sql, params, move |conn| {
            run_insert(conn, &owned_sql, &owned_params)
        })
        .await
    }

    async fn run(&self, sql: &str, params: &[Value]) -> Result<(DatabaseResult, QueryMetadata)> {
        let (owned_sql, owned_params) = (sql.to_string(), params.to_vec());
        self.with_connection(sql, params, move |conn| {
            run_any(conn, &owned_sql, &owned_params)
        })
        .await
    }

    async fn execute_batch(&self, sql: &str) -> Result<()> {
        let owned_sql = sql.to_string();
        self.with_connection(sql, &[], move |conn| conn.execute_batch(&owned_sql))
            .await
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if *self.state.get_mut() != TransactionState::Active {
            return;
        }
        let Some(conn) = self.connection.get_mut().take() else {
            return;
        };
        let id = self.id;
        warn!(transaction = id, "transaction dropped while active; rolling back");

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let result = conn
                        .interact(|conn| conn.execute_batch("ROLLBACK"))
                        .await;
                    match result {
                        Ok(Ok(())) => debug!(transaction = id, "dropped transaction rolled back"),
                        Ok(Err(err)) => warn!(transaction = id, error = %err, "rollback failed"),
                        Err(err) => warn!(transaction = id, error = %err, "rollback failed"),
                    }
                });
            }
            Err(_) => {
                // Rolled back when the connection is next checked out
                drop(conn);
            }
        }
    }
}
