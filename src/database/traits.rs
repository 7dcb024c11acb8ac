//! Query executor trait.

use crate::database::result::QueryResult;
use crate::error::DbResult;
use async_trait::async_trait;
use serde::Serialize;

/// Executes already-validated SQL under an enforced read-only session and transaction.
///
/// Implementations: [`PooledExecutor`](crate::database::PooledExecutor),
/// [`DirectExecutor`](crate::database::DirectExecutor).
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Returns the executor name (e.g., "pooled", "direct").
    fn name(&self) -> &'static str;

    /// Executes `sql` exactly as given, as a single statement.
    ///
    /// Both read-only layers are in force no matter what the text contains, so a
    /// statement that writes fails here with a database error.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::QueryFailed`](crate::error::DatabaseError::QueryFailed)
    /// if the database rejects or fails the statement, and a connection or pool error
    /// if no session could be obtained.
    async fn execute(&self, sql: &str) -> DbResult<QueryResult>;
}

/// How a request obtains its database session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStrategy {
    /// Borrow from the shared pool and return it afterwards.
    Pooled,
    /// Open a fresh connection per request and close it afterwards.
    Direct,
}
