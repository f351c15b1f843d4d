// Database layer module

pub mod pool;
pub mod scalar;

pub use pool::DbPool;

use crate::errors::{DatabaseError, QueryError};
use async_trait::async_trait;

/// A database handle able to evaluate scalar statements.
///
/// One handle is shared by every job runner bound to the same database, so
/// implementations must be safe for concurrent use.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Execute `statement` and return the single numeric value of its first row
    async fn query_scalar(&self, statement: &str) -> Result<f64, QueryError>;

    /// Check that the database is reachable
    async fn health_check(&self) -> Result<(), DatabaseError>;
}
