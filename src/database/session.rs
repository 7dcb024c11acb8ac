//! Read-only session setup and the transaction runner shared by both executors.
//!
//! Two independent layers keep the database from being mutated:
//!
//! - **Session**: every connection is opened with `default_transaction_read_only=on`
//!   as a startup parameter, so it holds for the life of the connection.
//! - **Transaction**: every statement runs inside `START TRANSACTION READ ONLY`,
//!   which is always committed or rolled back before the connection is released.

use crate::config::DatabaseConfig;
use crate::database::result::{QueryResult, project_rows};
use crate::error::{DatabaseError, DbResult};
use tokio_postgres::{CancelToken, Client, NoTls, Transaction};
use tracing::{debug, warn};

const READ_ONLY_SESSION_OPTION: &str = "-c default_transaction_read_only=on";

/// Connection settings with the read-only session attribute applied.
pub fn read_only_config(config: &DatabaseConfig) -> DbResult<tokio_postgres::Config> {
    let mut pg_config: tokio_postgres::Config = config
        .url
        .parse()
        .map_err(|e: tokio_postgres::Error| DatabaseError::ConnectionFailed(e.to_string()))?;

    let options = match pg_config.get_options() {
        Some(existing) if !existing.trim().is_empty() => {
            format!("{} {}", existing.trim(), READ_ONLY_SESSION_OPTION)
        }
        _ => READ_ONLY_SESSION_OPTION.to_string(),
    };
    pg_config.options(&options);
    pg_config.connect_timeout(config.connection_timeout);

    Ok(pg_config)
}

/// Fails unless the session reports itself as read-only.
pub async fn ensure_session_read_only(client: &Client) -> DbResult<()> {
    let row = client
        .query_one("SHOW default_transaction_read_only", &[])
        .await
        .map_err(DatabaseError::query)?;
    let value: String = row.try_get(0).map_err(DatabaseError::query)?;

    if value.eq_ignore_ascii_case("on") {
        Ok(())
    } else {
        Err(DatabaseError::NotReadOnly(format!(
            "default_transaction_read_only = {value}"
        )))
    }
}

/// Runs `sql` in a read-only transaction on `client`.
///
/// Commits on success and rolls back on failure. If the returned future is dropped
/// before completion, a cancel request is sent for the in-flight statement and the
/// transaction is rolled back when it drops. Callers that reuse the session must not
/// hand it to anyone else in that case, since the cancel may arrive late.
pub async fn run_read_only(client: &mut Client, sql: &str) -> DbResult<QueryResult> {
    let mut cancel = CancelOnDrop::new(client.cancel_token());
    let result = run_in_transaction(client, sql).await;
    cancel.disarm();
    result
}

async fn run_in_transaction(client: &mut Client, sql: &str) -> DbResult<QueryResult> {
    let transaction = client
        .build_transaction()
        .read_only(true)
        .start()
        .await
        .map_err(DatabaseError::transaction)?;

    match fetch(&transaction, sql).await {
        Ok(result) => {
            transaction
                .commit()
                .await
                .map_err(DatabaseError::transaction)?;
            debug!("Read-only transaction committed, {} rows", result.row_count);
            Ok(result)
        }
        Err(e) => {
            if let Err(rollback) = transaction.rollback().await {
                warn!("Rollback after failed query also failed: {}", rollback);
            }
            Err(e)
        }
    }
}

async fn fetch(transaction: &Transaction<'_>, sql: &str) -> DbResult<QueryResult> {
    let statement = transaction
        .prepare(sql)
        .await
        .map_err(DatabaseError::query)?;
    let rows = transaction
        .query(&statement, &[])
        .await
        .map_err(DatabaseError::query)?;

    project_rows(statement.columns(), &rows).map_err(DatabaseError::query)
}

/// Sends a cancel request for the session's running query unless disarmed first.
struct CancelOnDrop {
    token: Option<CancelToken>,
}

impl CancelOnDrop {
    fn new(token: CancelToken) -> Self {
        Self { token: Some(token) }
    }

    fn disarm(&mut self) {
        self.token = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        debug!("Request dropped mid-query; cancelling");
        handle.spawn(async move {
            if let Err(e) = token.cancel_query(NoTls).await {
                warn!("Failed to cancel abandoned query: {}", e);
            }
        });
    }
}
