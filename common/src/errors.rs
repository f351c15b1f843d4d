// Error handling framework

use std::time::Duration;
use thiserror::Error;

/// Configuration validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("No database configured")]
    NoDatabases,

    #[error("No metric configured")]
    NoMetrics,

    #[error("Invalid field value for {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },

    #[error("Duplicate database name: {0}")]
    DuplicateDatabase(String),
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidFieldValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Database-specific errors raised while opening or checking a handle
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Unsupported database URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Database health check failed: {0}")]
    HealthCheckFailed(String),
}

/// Errors raised by a single tick of a query job
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Query execution failed: {0}")]
    Execution(String),

    #[error("Query returned no rows")]
    NoRows,

    #[error("Query returned {0} columns, expected exactly one")]
    ColumnCount(usize),

    #[error("Query returned NULL")]
    Null,

    #[error("Column of type {type_name} is not numeric")]
    NonNumeric { type_name: String },

    #[error("Query timed out after {0:?}")]
    Timeout(Duration),
}

impl From<sqlx::Error> for QueryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => QueryError::NoRows,
            sqlx::Error::Database(db_err) => QueryError::Execution(db_err.message().to_string()),
            _ => QueryError::Execution(err.to_string()),
        }
    }
}

/// Value sink errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SinkError {
    #[error("Metric already registered: {0}")]
    AlreadyRegistered(String),
}

/// Fatal errors raised before any job runner starts
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("No query job configured")]
    NoJobs,

    #[error("Metric {metric} references unknown database {database}")]
    UnknownDatabase { metric: String, database: String },

    #[error("Database {database} is unreachable: {source}")]
    DatabaseUnreachable {
        database: String,
        #[source]
        source: DatabaseError,
    },

    #[error("Failed to register metric: {0}")]
    Registration(#[from] SinkError),
}
