//! Dialect selection
//!
//! Only SQLite is driven by this crate; the other dialects are recognised so that a
//! configuration naming them fails with a clear error instead of a parse failure.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Database dialects a configuration may name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// SQLite (file-backed or in-memory)
    #[default]
    Sqlite,
    /// PostgreSQL
    Postgres,
    /// MySQL/MariaDB
    Mysql,
}

impl DatabaseType {
    /// Convert database type to string representation
    pub fn to_str(&self) -> &'static str {
        match self {
            DatabaseType::Sqlite => "sqlite",
            DatabaseType::Postgres => "postgres",
            DatabaseType::Mysql => "mysql",
        }
    }

    /// Whether a storage engine for this dialect ships with the crate
    pub fn is_supported(&self) -> bool {
        matches!(self, DatabaseType::Sqlite)
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

impl FromStr for DatabaseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(DatabaseType::Sqlite),
            "postgres" | "postgresql" => Ok(DatabaseType::Postgres),
            "mysql" | "mariadb" => Ok(DatabaseType::Mysql),
            _ => Err(format!("Invalid database type: '{}'", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_type_from_str() {
        assert_eq!("sqlite3".parse::<DatabaseType>().ok(), Some(DatabaseType::Sqlite));
        assert_eq!(
            "PostgreSQL".parse::<DatabaseType>().ok(),
            Some(DatabaseType::Postgres)
        );
        assert_eq!("mariadb".parse::<DatabaseType>().ok(), Some(DatabaseType::Mysql));
        assert!("oracle".parse::<DatabaseType>().is_err());
    }

    #[test]
    fn test_database_type_support() {
        assert!(DatabaseType::Sqlite.is_supported());
        assert!(!DatabaseType::Postgres.is_supported());
        assert_eq!(DatabaseType::default(), DatabaseType::Sqlite);
        assert_eq!(DatabaseType::Mysql.to_string(), "mysql");
    }
}
