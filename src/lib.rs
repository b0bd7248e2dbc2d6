//! # Rust ORM System
//!
//! An entity-relationship mapping layer over SQLite. Entities and their associations are
//! declared in a [`SchemaRegistry`](crate::core::SchemaRegistry); the [`Orm`](orm::Orm) context
//! then synchronizes the physical schema, runs structured and raw queries, resolves
//! association accessors, and coordinates transactions on a pooled connection.
//!
//! ## Features
//!
//! - **Typed definitions**: fields, defaults and constraints validated when declared
//! - **Associations**: `HasOne`, `HasMany`, `BelongsTo` and `BelongsToMany` through a join
//!   table or a registered join entity
//! - **Schema synchronization**: destructive recreate or additive migrate, in dependency order
//! - **Eager loading**: includes with filters on the related entity
//! - **Transactions**: explicit handles, a commit-or-rollback coordinator, and savepoints for
//!   atomic bulk writes
//! - **Connection pooling**: `deadpool-sqlite` with acquire and per-operation timeouts
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rust_orm_system::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut registry = SchemaRegistry::new();
//!     registry.define("team", vec![FieldDef::string("name")])?;
//!     registry.define("player", vec![FieldDef::string("name")])?;
//!     let options = AssociationOptions::default;
//!     registry.associate(AssociationKind::BelongsTo, "player", "team", options())?;
//!     registry.associate(AssociationKind::HasMany, "team", "player", options())?;
//!
//!     let orm = Orm::connect(EngineConfig::sqlite("database.sqlite"), registry).await?;
//!     orm.sync(SyncMode::Recreate).await?;
//!
//!     let orange = orm.create("team", values! { "name" => "Orange" }, None).await?;
//!     let players = orm
//!         .bulk_create(
//!             "player",
//!             vec![values! { "name" => "john" }, values! { "name" => "bob" }],
//!             None,
//!         )
//!         .await?;
//!     orm.add_related(&orange, "players", &players, None).await?;
//!
//!     let roster = orm
//!         .find_all(
//!             "player",
//!             FindOptions::new().filter(Filter::new().eq("teamId", orange.id())),
//!             None,
//!         )
//!         .await?;
//!     assert_eq!(roster.len(), 2);
//!
//!     orm.close();
//!     Ok(())
//! }
//! ```
//!
//! ## Project Structure
//!
//! ```text
//! rust_orm_system/
//! ├── src/
//! │   ├── core/              # Definitions, values, errors, SQL builders, sync
//! │   ├── backends/          # SQLite engine and transaction handle
//! │   ├── orm/               # Mapping context: queries and association accessors
//! │   ├── logging.rs         # tracing subscriber setup
//! │   └── lib.rs
//! ├── demos/                 # Sports league walkthrough
//! ├── tests/                 # Integration and property tests
//! └── benches/
//! ```

/// Core types: definitions, values, errors and SQL builders
pub mod core;

/// Storage engine implementations
pub mod backends;

/// Mapping context
pub mod orm;

/// Tracing subscriber setup
pub mod logging;

/// Prelude for convenient imports
///
/// ```rust
/// use rust_orm_system::prelude::*;
///
/// let row = values! { "name" => "john", "age" => 30 };
/// assert_eq!(row.get("age"), Some(&Value::Integer(30)));
/// ```
pub mod prelude {
    pub use crate::backends::{SqliteEngine, Transaction, TransactionState};
    pub use crate::core::{
        Association, AssociationKind, AssociationOptions, DatabaseError, DatabaseResult,
        DatabaseRow, DatabaseType, EngineConfig, EntityDefinition, EntityOptions, Executor,
        FieldDef, FieldType, Filter, OrderDirection, PoolSettings, QueryMetadata, Result, Row,
        SchemaRegistry, StorageErrorKind, SyncMode, SyncReport, Through, Value, Values,
    };
    pub use crate::orm::{FindOptions, Include, Orm};
    pub use crate::values;
}

// Re-export at root level for convenience
pub use crate::core::{DatabaseError, Result, Row, SchemaRegistry, Value, Values};
pub use crate::orm::Orm;

/// Build a [`Values`](crate::core::Values) map from `column => value` pairs
///
/// Every value goes through `Value::from`, so plain literals work.
#[macro_export]
macro_rules! values {
    () => {
        $crate::core::value::Values::new()
    };
    ($($column:expr => $value:expr),+ $(,)?) => {{
        let mut values = $crate::core::value::Values::new();
        $(values.insert(
            ::std::string::ToString::to_string(&$column),
            $crate::core::value::Value::from($value),
        );)+
        values
    }};
}
