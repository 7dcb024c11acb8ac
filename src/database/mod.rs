//! Read-only execution engine.
//!
//! Both executors run the same session and transaction logic from [`session`]; they
//! differ only in whether the connection is borrowed from a pool or opened per request.

pub mod direct;
pub mod pool;
pub mod result;
pub mod session;
pub mod traits;

pub use direct::DirectExecutor;
pub use pool::PooledExecutor;
pub use result::{CellValue, QueryResult, Record, project};
pub use traits::{ConnectionStrategy, QueryExecutor};
