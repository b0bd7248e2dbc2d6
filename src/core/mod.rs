//! Core building blocks of the mapping layer
//!
//! Error and value types, the schema registry, SQL builders, schema synchronization, and
//! the `Executor` seam that storage engines implement.

pub mod association;
pub mod config;
pub mod database;
pub mod database_types;
pub mod error;
pub mod query_builder;
pub mod row;
pub mod schema;
pub mod sync;
pub mod value;

// Re-export commonly used types
pub use association::{Association, AssociationKind, AssociationOptions, Cardinality, Through};
pub use config::{EngineConfig, PoolSettings};
pub use database::{Executor, QueryMetadata};
pub use database_types::DatabaseType;
pub use error::{DatabaseError, Result, StorageErrorKind};
pub use query_builder::{Filter, OrderDirection};
pub use row::Row;
pub use schema::{EntityDefinition, EntityOptions, FieldDef, FieldType, SchemaRegistry};
pub use sync::{SyncMode, SyncReport};
pub use value::{DatabaseResult, DatabaseRow, Value, Values};
