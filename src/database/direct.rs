//! Ad-hoc executor: one fresh connection per query.

use crate::config::DatabaseConfig;
use crate::database::result::QueryResult;
use crate::database::session::{read_only_config, run_read_only};
use crate::database::traits::QueryExecutor;
use crate::error::{DatabaseError, DbResult};
use async_trait::async_trait;
use tokio_postgres::NoTls;
use tracing::{debug, instrument};

/// Opens a read-only connection for each query and closes it afterwards.
///
/// Pays the connection setup cost every call; no session state can carry over
/// between requests.
pub struct DirectExecutor {
    pg_config: tokio_postgres::Config,
}

impl DirectExecutor {
    pub fn new(config: &DatabaseConfig) -> DbResult<Self> {
        Ok(Self {
            pg_config: read_only_config(config)?,
        })
    }
}

#[async_trait]
impl QueryExecutor for DirectExecutor {
    fn name(&self) -> &'static str {
        "direct"
    }

    #[instrument(skip(self, sql), fields(executor = "direct"))]
    async fn execute(&self, sql: &str) -> DbResult<QueryResult> {
        let (mut client, connection) = self
            .pg_config
            .connect(NoTls)
            .await
            .map_err(DatabaseError::connection)?;

        // The connection task ends once `client` is dropped.
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("Direct connection closed with error: {}", e);
            }
        });

        let result = run_read_only(&mut client, sql).await;
        drop(client);
        debug!("Database connection closed");
        result
    }
}
