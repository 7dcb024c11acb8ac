//! Gateway binary entry point.

use anyhow::Result;
use guarded_sql_gateway::{
    config::ServerConfig,
    database::PooledExecutor,
    error::DatabaseError,
    server::{ServerStateBuilder, create_router},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!(
        "Starting {} v{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let config = ServerConfig::from_env().inspect_err(|e| {
        error!("Server misconfigured: {}", e);
    })?;

    info!(
        "Rate limit {}, statement separator {}, table restriction {}",
        config.security.rate_limit,
        config.security.statement_separator.as_str(),
        config.security.allowed_table.as_deref().unwrap_or("disabled")
    );

    let pooled = Arc::new(PooledExecutor::new(&config.database)?);
    match pooled.verify_read_only().await {
        Ok(()) => {}
        Err(e @ DatabaseError::NotReadOnly(_)) => {
            error!("Refusing to start: {}", e);
            return Err(e.into());
        }
        Err(e) => {
            warn!("Could not verify read-only sessions at startup: {}", e);
            warn!("Serving anyway; queries will fail until the database is reachable");
        }
    }

    let bind_addr = config.bind_addr;
    let state = Arc::new(
        ServerStateBuilder::new()
            .config(config)
            .pooled_executor(pooled)
            .build()?,
    );

    let listener = TcpListener::bind(bind_addr).await?;
    info!("Listening on {}", bind_addr);

    axum::serve(
        listener,
        create_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!("Failed to listen for SIGTERM: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("guarded_sql_gateway=info,tower_http=info,warn"));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .json()
        .init();
}
