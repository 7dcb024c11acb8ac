//! Pooled executor using `deadpool-postgres`.

use crate::config::DatabaseConfig;
use crate::database::result::QueryResult;
use crate::database::session::{ensure_session_read_only, read_only_config, run_read_only};
use crate::database::traits::QueryExecutor;
use crate::error::{DatabaseError, DbResult};
use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod, Runtime};
use tokio_postgres::{Client, NoTls};
use tracing::{debug, info, instrument};

/// Borrows a read-only session from a shared pool per query.
///
/// Connections are created with the read-only session attribute. On return they are
/// recycled with `DISCARD ALL`, which resets every session setting to its connection
/// startup value, so nothing a previous borrower changed survives into the next borrow.
pub struct PooledExecutor {
    pool: Pool,
}

impl PooledExecutor {
    /// Build the pool. No connection is opened until the first query.
    pub fn new(config: &DatabaseConfig) -> DbResult<Self> {
        let pg_config = read_only_config(config)?;
        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Clean,
            },
        );

        let pool = Pool::builder(manager)
            .max_size(config.pool_size as usize)
            .runtime(Runtime::Tokio1)
            .wait_timeout(Some(config.connection_timeout))
            .create_timeout(Some(config.connection_timeout))
            .build()
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        info!(
            "PostgreSQL connection pool created with max size {}",
            config.pool_size
        );

        Ok(Self { pool })
    }

    /// Borrow one connection and confirm the session attribute is in force.
    pub async fn verify_read_only(&self) -> DbResult<()> {
        let client = self.pool.get().await?;
        ensure_session_read_only(&client).await?;
        info!("Pooled sessions are read-only");
        Ok(())
    }

    pub fn status(&self) -> deadpool_postgres::Status {
        self.pool.status()
    }
}

#[async_trait]
impl QueryExecutor for PooledExecutor {
    fn name(&self) -> &'static str {
        "pooled"
    }

    #[instrument(skip(self, sql), fields(executor = "pooled"))]
    async fn execute(&self, sql: &str) -> DbResult<QueryResult> {
        let mut lease = Lease::new(self.pool.get().await?);
        let result = run_read_only(lease.client()?, sql).await;
        lease.release();

        let status = self.pool.status();
        debug!(
            "Returned pooled connection ({} of {} available)",
            status.available, status.max_size
        );
        result
    }
}

/// A connection borrowed for one query.
///
/// If the lease is dropped before [`Lease::release`], the query was abandoned while
/// running and a cancel request for it may still be in flight. The connection is then
/// detached from the pool and closed, so that cancel can only ever reach this session.
struct Lease {
    object: Option<Object>,
}

impl Lease {
    fn new(object: Object) -> Self {
        Self {
            object: Some(object),
        }
    }

    fn client(&mut self) -> DbResult<&mut Client> {
        self.object
            .as_mut()
            .map(|object| &mut ***object)
            .ok_or_else(|| DatabaseError::ConnectionFailed("connection already released".into()))
    }

    /// Return the connection to the pool for recycling.
    fn release(mut self) {
        drop(self.object.take());
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(object) = self.object.take() {
            debug!("Query abandoned; closing its connection instead of recycling it");
            drop(Object::take(object));
        }
    }
}
