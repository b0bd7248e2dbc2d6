//! Error types for the mapping layer
//!
//! Every operation returns [`Result`]; nothing in the library panics on a storage failure.

use std::fmt;

/// Result type alias for mapping-layer operations
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Category of a failure reported by the storage engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageErrorKind {
    /// Input rejected before or by the engine (bad column, wrong type, missing value)
    Validation,
    /// The engine could not be reached, opened, or locked
    Connectivity,
    /// A uniqueness, NOT NULL or CHECK constraint fired
    Constraint,
    /// Any other statement failure (syntax, missing table, ...)
    Query,
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageErrorKind::Validation => "validation",
            StorageErrorKind::Connectivity => "connectivity",
            StorageErrorKind::Constraint => "constraint",
            StorageErrorKind::Query => "query",
        };
        f.write_str(name)
    }
}

/// Error types for schema, query and transaction operations
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// An entity with this name is already registered
    #[error("Entity already defined: {0}")]
    DuplicateEntity(String),

    /// The entity is not registered
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    /// The owner entity has no association with this name
    #[error("Unknown association '{name}' on entity '{entity}'")]
    UnknownAssociation { entity: String, name: String },

    /// Association kind or declaration side not supported
    #[error("Unsupported association kind '{kind}': {reason}")]
    UnsupportedAssociationKind { kind: String, reason: String },

    /// Malformed entity or association declaration
    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),

    /// Physical schema cannot be laid out as declared
    #[error("Schema conflict: {0}")]
    SchemaConflict(String),

    /// A reference points at a row that does not exist
    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// Failure reported by (or on the way to) the storage engine
    #[error("Storage error ({kind}): {message}")]
    Storage {
        kind: StorageErrorKind,
        message: String,
    },

    /// A row that had to exist was not found
    #[error("{entity} with id {id} not found")]
    NotFound { entity: String, id: i64 },

    /// No pooled connection became available in time
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout { timeout_ms: u64 },

    /// Statement did not finish in time
    #[error("Query timeout after {timeout_ms}ms")]
    QueryTimeout { timeout_ms: u64 },

    /// Transaction lifecycle misuse or failure
    #[error("Transaction error: {0}")]
    TransactionError(String),

    /// Unsupported operation
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl DatabaseError {
    /// Create a storage error of the given kind
    pub fn storage<S: Into<String>>(kind: StorageErrorKind, msg: S) -> Self {
        DatabaseError::Storage {
            kind,
            message: msg.into(),
        }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::storage(StorageErrorKind::Validation, msg)
    }

    /// Create a connectivity error
    pub fn connectivity<S: Into<String>>(msg: S) -> Self {
        Self::storage(StorageErrorKind::Connectivity, msg)
    }

    /// Create a constraint error
    pub fn constraint<S: Into<String>>(msg: S) -> Self {
        Self::storage(StorageErrorKind::Constraint, msg)
    }

    /// Create a query error
    pub fn query<S: Into<String>>(msg: S) -> Self {
        Self::storage(StorageErrorKind::Query, msg)
    }

    /// Create an unsupported association kind error
    pub fn unsupported_kind(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        DatabaseError::UnsupportedAssociationKind {
            kind: kind.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid definition error
    pub fn invalid_definition<S: Into<String>>(msg: S) -> Self {
        DatabaseError::InvalidDefinition(msg.into())
    }

    /// Create a schema conflict error
    pub fn schema_conflict<S: Into<String>>(msg: S) -> Self {
        DatabaseError::SchemaConflict(msg.into())
    }

    /// Create a connection timeout error
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        DatabaseError::ConnectionTimeout { timeout_ms }
    }

    /// Create a query timeout error
    pub fn query_timeout(timeout_ms: u64) -> Self {
        DatabaseError::QueryTimeout { timeout_ms }
    }

    /// Create a new transaction error
    pub fn transaction<S: Into<String>>(msg: S) -> Self {
        DatabaseError::TransactionError(msg.into())
    }

    /// Create a new unsupported operation error
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        DatabaseError::UnsupportedOperation(msg.into())
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Other(msg.into())
    }

    /// Storage kind, if this is a storage error
    pub fn storage_kind(&self) -> Option<StorageErrorKind> {
        match self {
            DatabaseError::Storage { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Whether this is a validation failure
    pub fn is_validation(&self) -> bool {
        self.storage_kind() == Some(StorageErrorKind::Validation)
    }
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        let message = err.to_string();
        match &err {
            rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
                ErrorCode::ConstraintViolation
                    if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
                {
                    DatabaseError::ForeignKeyViolation(message)
                }
                ErrorCode::ConstraintViolation => DatabaseError::constraint(message),
                ErrorCode::CannotOpen
                | ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::NotADatabase
                | ErrorCode::SystemIoFailure
                | ErrorCode::PermissionDenied
                | ErrorCode::ReadOnly => DatabaseError::connectivity(message),
                ErrorCode::TypeMismatch => DatabaseError::validation(message),
                _ => DatabaseError::query(message),
            },
            rusqlite::Error::InvalidParameterCount(_, _)
            | rusqlite::Error::InvalidColumnType(_, _, _)
            | rusqlite::Error::ToSqlConversionFailure(_) => DatabaseError::validation(message),
            _ => DatabaseError::query(message),
        }
    }
}

impl From<std::io::Error> for DatabaseError {
    fn from(err: std::io::Error) -> Self {
        DatabaseError::connectivity(err.to_string())
    }
}
