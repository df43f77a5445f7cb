//! Database access used by the reconciliation engine.
//!
//! The engine only needs to run statement batches, so the pool is abstracted
//! behind [`SchemaPool`]. The `postgres` feature provides an sqlx-backed
//! implementation in [`crate::postgres`]; tests use in-memory doubles.

use async_trait::async_trait;

use crate::error::PoolError;

/// A bounded pool of database sessions.
///
/// Implementations must be safe to use from many tasks at once.
#[async_trait]
pub trait SchemaPool: Send + Sync {
    /// Executes one or more `;`-separated statements on any pooled session.
    async fn exec(&self, sql: &str) -> Result<(), PoolError>;

    /// Checks out a dedicated session.
    async fn acquire(&self) -> Result<Box<dyn PoolSession>, PoolError>;

    /// Maximum number of sessions the pool hands out concurrently.
    fn max_connections(&self) -> usize;
}

/// A session checked out from a [`SchemaPool`]; returned to the pool on drop.
#[async_trait]
pub trait PoolSession: Send {
    async fn exec(&mut self, sql: &str) -> Result<(), PoolError>;

    /// Executes `statements` in order inside a single transaction, rolling
    /// back if any of them fails.
    async fn exec_in_transaction(&mut self, statements: &[&str]) -> Result<(), PoolError>;

    /// Runs a query returning a single text column.
    async fn query_strings(&mut self, sql: &str) -> Result<Vec<String>, PoolError>;
}
