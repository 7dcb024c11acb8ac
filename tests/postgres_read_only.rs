//! Read-only guarantees against a live PostgreSQL server.
//!
//! Set `GATEWAY_TEST_DATABASE_URL` to run these; without it every test returns early.

use guarded_sql_gateway::config::{DatabaseConfig, DatabaseConfigBuilder};
use guarded_sql_gateway::database::{DirectExecutor, PooledExecutor, QueryExecutor};
use guarded_sql_gateway::error::DatabaseError;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const URL_VAR: &str = "GATEWAY_TEST_DATABASE_URL";

fn database_config(pool_size: u32) -> Option<DatabaseConfig> {
    let Ok(url) = std::env::var(URL_VAR) else {
        eprintln!("{URL_VAR} not set, skipping");
        return None;
    };
    Some(
        DatabaseConfigBuilder::new()
            .url(url)
            .pool_size(pool_size)
            .build()
            .expect("valid test database url"),
    )
}

fn executors(config: &DatabaseConfig) -> Vec<Box<dyn QueryExecutor>> {
    vec![
        Box::new(PooledExecutor::new(config).unwrap()),
        Box::new(DirectExecutor::new(config).unwrap()),
    ]
}

#[tokio::test]
async fn test_select_projects_rows() {
    let Some(config) = database_config(2) else { return };

    for executor in executors(&config) {
        let result = executor
            .execute("select 1 as one, 'x' as label, null::int as missing")
            .await
            .unwrap();
        assert_eq!(result.row_count, 1, "{}", executor.name());
        assert_eq!(
            serde_json::to_value(&result.rows).unwrap(),
            json!([{"one": 1, "label": "x", "missing": null}])
        );
    }
}

#[tokio::test]
async fn test_empty_result() {
    let Some(config) = database_config(1) else { return };

    for executor in executors(&config) {
        let result = executor.execute("select 1 as one where false").await.unwrap();
        assert!(result.rows.is_empty(), "{}", executor.name());
    }
}

#[tokio::test]
async fn test_writes_are_refused() {
    let Some(config) = database_config(1) else { return };

    for executor in executors(&config) {
        let err = executor
            .execute("create table gateway_write_probe (id int)")
            .await
            .unwrap_err();
        assert!(
            matches!(err, DatabaseError::QueryFailed(ref m) if m.contains("read-only")),
            "{}: {err}",
            executor.name()
        );
    }
}

#[tokio::test]
async fn test_stacked_statements_are_refused() {
    let Some(config) = database_config(1) else { return };

    for executor in executors(&config) {
        let result = executor
            .execute("select 1; create table gateway_write_probe (id int)")
            .await;
        assert!(result.is_err(), "{}", executor.name());
    }
}

#[tokio::test]
async fn test_session_override_does_not_survive_recycling() {
    let Some(config) = database_config(1) else { return };
    let pooled = PooledExecutor::new(&config).unwrap();

    pooled
        .execute("select set_config('default_transaction_read_only', 'off', false)")
        .await
        .unwrap();

    let result = pooled
        .execute("select current_setting('default_transaction_read_only') as ro")
        .await
        .unwrap();
    assert_eq!(
        serde_json::to_value(&result.rows).unwrap(),
        json!([{"ro": "on"}])
    );

    assert!(
        pooled
            .execute("create table gateway_write_probe (id int)")
            .await
            .is_err()
    );
    pooled.verify_read_only().await.unwrap();
}

#[tokio::test]
async fn test_failed_query_releases_connection() {
    let Some(config) = database_config(1) else { return };
    let pooled = PooledExecutor::new(&config).unwrap();

    assert!(pooled.execute("select * from no_such_table_here").await.is_err());

    let result = pooled.execute("select 2 as two").await.unwrap();
    assert_eq!(serde_json::to_value(&result.rows).unwrap(), json!([{"two": 2}]));
}

#[tokio::test]
async fn test_concurrent_queries_are_isolated() {
    let Some(config) = database_config(4) else { return };
    let pooled = Arc::new(PooledExecutor::new(&config).unwrap());

    let tasks: Vec<_> = (0..16)
        .map(|n| {
            let pooled = Arc::clone(&pooled);
            tokio::spawn(async move {
                let sql = format!("select {n} as n, pg_sleep(0.05)::text as pause");
                (n, pooled.execute(&sql).await)
            })
        })
        .collect();

    for task in tasks {
        let (n, result) = task.await.unwrap();
        let result = result.unwrap();
        assert_eq!(result.row_count, 1);
        assert_eq!(
            serde_json::to_value(&result.rows[0]["n"]).unwrap(),
            json!(n)
        );
    }
}

#[tokio::test]
async fn test_abandoned_query_does_not_cancel_next_borrower() {
    let Some(config) = database_config(1) else { return };
    let pooled = PooledExecutor::new(&config).unwrap();

    for round in 0..30u64 {
        let abandon_after = Duration::from_millis(10 + round % 10);
        let abandoned = tokio::time::timeout(
            abandon_after,
            pooled.execute("select pg_sleep(0.02)::text"),
        )
        .await;
        assert!(abandoned.is_err(), "round {round}: query finished early");

        let result = pooled
            .execute(&format!("select {round} as n, pg_sleep(0.05)::text as pause"))
            .await
            .unwrap_or_else(|e| panic!("round {round}: next borrower failed: {e}"));
        assert_eq!(
            serde_json::to_value(&result.rows[0]["n"]).unwrap(),
            json!(round)
        );
        assert!(pooled.status().size <= 1);
    }
}

#[tokio::test]
async fn test_non_scalar_types_pass_through() {
    let Some(config) = database_config(1) else { return };

    for executor in executors(&config) {
        let result = executor
            .execute(
                "select array[1,2] as arr, array['a', null] as tarr, \
                 array[[1,2],[3,4]] as grid, '1 day 02:00:00'::interval as iv, \
                 '10.0.0.1'::inet as ip, '10.0.0.0/8'::cidr as net",
            )
            .await
            .unwrap();
        assert_eq!(
            serde_json::to_value(&result.rows).unwrap(),
            json!([{
                "arr": [1, 2],
                "tarr": ["a", null],
                "grid": [[1, 2], [3, 4]],
                "iv": "1 day 02:00:00",
                "ip": "10.0.0.1",
                "net": "10.0.0.0/8",
            }]),
            "{}",
            executor.name()
        );
    }
}

#[tokio::test]
async fn test_verify_read_only() {
    let Some(config) = database_config(1) else { return };
    PooledExecutor::new(&config)
        .unwrap()
        .verify_read_only()
        .await
        .unwrap();
}
