//! The mapping context
//!
//! [`Orm`] ties a frozen [`SchemaRegistry`] to a storage engine. Query and relationship
//! operations live in the `query` and `relations` submodules; every one of them takes an
//! optional [`Transaction`] and runs on its own pooled connection when none is given.

mod query;
mod relations;

pub use query::{FindOptions, Include};

use crate::backends::{SqliteEngine, Transaction, TransactionState};
use crate::core::config::EngineConfig;
use crate::core::database::Executor;
use crate::core::error::{DatabaseError, Result};
use crate::core::schema::{quote_ident, EntityDefinition, SchemaRegistry};
use crate::core::sync::{synchronize, SyncMode, SyncReport};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

static NEXT_SAVEPOINT: AtomicU64 = AtomicU64::new(1);

/// Mapping context: registry plus storage engine
///
/// # Example
///
/// ```no_run
/// use rust_orm_system::prelude::*;
///
/// # async fn example() -> Result<()> {
/// let mut registry = SchemaRegistry::new();
/// registry.define("player", vec![FieldDef::string("name")])?;
///
/// let orm = Orm::connect(EngineConfig::sqlite("database.sqlite"), registry).await?;
/// orm.sync(SyncMode::Recreate).await?;
/// let john = orm.create("player", values! { "name" => "john" }, None).await?;
/// assert_eq!(john.get_str("name"), Some("john"));
/// # Ok(())
/// # }
/// ```
pub struct Orm {
    engine: SqliteEngine,
    registry: Arc<SchemaRegistry>,
    columns: HashMap<String, Vec<String>>,
}

impl Orm {
    /// Connect the engine and freeze the registry
    ///
    /// # Errors
    ///
    /// Connectivity errors from the engine; startup failures are reported, not retried.
    pub async fn connect(config: EngineConfig, registry: SchemaRegistry) -> Result<Self> {
        let mut columns = HashMap::new();
        for entity in registry.entities() {
            columns.insert(entity.name().to_string(), registry.columns_of(entity.name())?);
        }
        let engine = SqliteEngine::connect(config).await?;
        Ok(Self {
            engine,
            registry: Arc::new(registry),
            columns,
        })
    }

    /// Schema registry
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Storage engine
    pub fn engine(&self) -> &SqliteEngine {
        &self.engine
    }

    /// Check that the database answers
    pub async fn authenticate(&self) -> Result<()> {
        self.engine.authenticate().await
    }

    /// Reconcile the database schema with the registry inside one transaction
    pub async fn sync(&self, mode: SyncMode) -> Result<SyncReport> {
        let registry = Arc::clone(&self.registry);
        self.with_transaction(|txn| async move { synchronize(&txn, &registry, mode).await })
            .await
    }

    /// Begin a transaction for manual `commit` / `rollback`
    pub async fn transaction(&self) -> Result<Transaction> {
        self.engine.begin().await
    }

    /// Run `work` inside a transaction
    ///
    /// Commits when `work` returns `Ok`. On `Err` the transaction is rolled back and the
    /// original error is returned; a failing rollback is only logged. Operations inside
    /// `work` join the transaction only when the handle is passed to them.
    ///
    /// ```no_run
    /// # use rust_orm_system::prelude::*;
    /// # async fn example(orm: &Orm) -> Result<()> {
    /// orm.with_transaction(|t| async move {
    ///     let skills = orm.find_all("skill", FindOptions::new(), Some(&t)).await?;
    ///     let john = orm.find_one("player", Filter::new().eq("name", "john"), Some(&t)).await?;
    ///     if let Some(john) = john {
    ///         orm.add_related(&john, "skills", &skills, Some(&t)).await?;
    ///     }
    ///     Ok(())
    /// })
    /// .await
    /// # }
    /// ```
    pub async fn with_transaction<F, Fut, T>(&self, work: F) -> Result<T>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let txn = self.engine.begin().await?;
        match work(txn.clone()).await {
            Ok(value) => match txn.state() {
                TransactionState::Active => {
                    txn.commit().await?;
                    Ok(value)
                }
                TransactionState::Committed => Ok(value),
                TransactionState::RolledBack => Err(DatabaseError::transaction(
                    "transaction was rolled back inside its unit of work",
                )),
            },
            Err(err) => {
                if txn.is_active() {
                    if let Err(rollback_err) = txn.rollback().await {
                        warn!(
                            transaction = txn.id(),
                            error = %rollback_err,
                            "rollback failed; returning the original error"
                        );
                    }
                }
                debug!(transaction = txn.id(), error = %err, "transaction rolled back");
                Err(err)
            }
        }
    }

    /// Close the connection pool
    pub fn close(&self) {
        self.engine.close();
        info!("mapper closed");
    }

    pub(crate) fn executor<'a>(&'a self, txn: Option<&'a Transaction>) -> &'a dyn Executor {
        match txn {
            Some(txn) => txn,
            None => &self.engine,
        }
    }

    pub(crate) fn definition(&self, entity: &str) -> Result<&EntityDefinition> {
        self.registry.entity(entity)
    }

    /// Physical columns of an entity's table
    pub fn columns_of(&self, entity: &str) -> Result<&[String]> {
        self.columns
            .get(entity)
            .map(Vec::as_slice)
            .ok_or_else(|| DatabaseError::UnknownEntity(entity.to_string()))
    }

    pub(crate) fn check_columns<'c>(
        &self,
        entity: &str,
        columns: impl IntoIterator<Item = &'c str>,
    ) -> Result<()> {
        let known = self.columns_of(entity)?;
        for column in columns {
            if !known.iter().any(|c| c == column) {
                return Err(DatabaseError::validation(format!(
                    "unknown column '{}' on entity '{}'",
                    column, entity
                )));
            }
        }
        Ok(())
    }

    /// Open a unit of atomic writes: a savepoint inside `txn`, or a fresh transaction
    pub(crate) async fn write_scope(&self, txn: Option<&Transaction>) -> Result<WriteScope> {
        match txn {
            Some(txn) => {
                let name = format!(
                    "orm_savepoint_{}",
                    NEXT_SAVEPOINT.fetch_add(1, Ordering::Relaxed)
                );
                txn.execute_batch(&format!("SAVEPOINT {}", quote_ident(&name)))
                    .await?;
                Ok(WriteScope {
                    txn: txn.clone(),
                    savepoint: Some(name),
                })
            }
            None => Ok(WriteScope {
                txn: self.engine.begin().await?,
                savepoint: None,
            }),
        }
    }
}

/// Atomic group of writes opened by `Orm::write_scope`
pub(crate) struct WriteScope {
    txn: Transaction,
    savepoint: Option<String>,
}

impl WriteScope {
    pub(crate) fn executor(&self) -> &dyn Executor {
        &self.txn
    }

    pub(crate) async fn complete(self) -> Result<()> {
        match &self.savepoint {
            Some(name) => {
                self.txn
                    .execute_batch(&format!("RELEASE SAVEPOINT {}", quote_ident(name)))
                    .await
            }
            None => self.txn.commit().await,
        }
    }

    pub(crate) async fn abort(self) {
        let outcome = match &self.savepoint {
            Some(name) => {
                let name = quote_ident(name);
                self.txn
                    .execute_batch(&format!(
                        "ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}"
                    ))
                    .await
            }
            None => self.txn.rollback().await,
        };
        if let Err(err) = outcome {
            warn!(transaction = self.txn.id(), error = %err, "failed to undo partial writes");
        }
    }

    /// Complete on `Ok`, abort on `Err`, and pass the result through
    pub(crate) async fn finish<T>(self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.complete().await?;
                Ok(value)
            }
            Err(err) => {
                self.abort().await;
                Err(err)
            }
        }
    }
}
