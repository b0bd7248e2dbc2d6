//! Storage engine implementations
//!
//! SQLite is the only engine; it implements the `Executor` seam together with the
//! transaction handle it hands out.

pub mod sqlite;
pub mod transaction;

pub use sqlite::{PoolStats, SqliteEngine};
pub use transaction::{Transaction, TransactionState};
