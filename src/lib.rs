//! Guarded read-only SQL gateway.
//!
//! Accepts SQL over HTTP from callers holding a shared API key, throttles each
//! caller, screens the text against a lexical policy and runs what passes against
//! PostgreSQL with two independent read-only guarantees: the session attribute set
//! at connection startup and a `READ ONLY` transaction around every statement.
//!
//! # Example
//!
//! ```no_run
//! use guarded_sql_gateway::{
//!     config::ServerConfig,
//!     server::{ServerStateBuilder, create_router},
//! };
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::from_env()?;
//!     let bind_addr = config.bind_addr;
//!
//!     let state = Arc::new(ServerStateBuilder::new().config(config).build()?);
//!     let listener = tokio::net::TcpListener::bind(bind_addr).await?;
//!
//!     axum::serve(
//!         listener,
//!         create_router(state).into_make_service_with_connect_info::<SocketAddr>(),
//!     )
//!     .await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod database;
pub mod error;
pub mod security;
pub mod server;

pub use config::{DatabaseConfig, DatabaseConfigBuilder, RateLimit, SecurityConfig, ServerConfig};
pub use database::{ConnectionStrategy, DirectExecutor, PooledExecutor, QueryExecutor};
pub use error::{GatewayError, Result};
pub use security::{CredentialGate, RateLimiter, SqlValidator};
pub use server::{ServerState, ServerStateBuilder, create_router};
