//! Server state management.

use crate::config::ServerConfig;
use crate::database::{ConnectionStrategy, DirectExecutor, PooledExecutor, QueryExecutor};
use crate::error::{ConfigError, Result};
use crate::security::{CredentialGate, RateLimiter, SqlValidator};
use std::sync::Arc;

/// Everything a request needs. Built once at startup and never mutated afterwards,
/// apart from the rate limiter's own bookkeeping.
pub struct ServerState {
    pub config: ServerConfig,
    pub gate: CredentialGate,
    pub validator: SqlValidator,
    pub rate_limiter: RateLimiter,
    pooled: Arc<dyn QueryExecutor>,
    direct: Arc<dyn QueryExecutor>,
}

impl ServerState {
    pub fn executor(&self, strategy: ConnectionStrategy) -> &dyn QueryExecutor {
        match strategy {
            ConnectionStrategy::Pooled => self.pooled.as_ref(),
            ConnectionStrategy::Direct => self.direct.as_ref(),
        }
    }
}

#[derive(Default)]
pub struct ServerStateBuilder {
    config: Option<ServerConfig>,
    pooled: Option<Arc<dyn QueryExecutor>>,
    direct: Option<Arc<dyn QueryExecutor>>,
}

impl ServerStateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn pooled_executor(mut self, executor: Arc<dyn QueryExecutor>) -> Self {
        self.pooled = Some(executor);
        self
    }

    pub fn direct_executor(mut self, executor: Arc<dyn QueryExecutor>) -> Self {
        self.direct = Some(executor);
        self
    }

    /// Executors not supplied are built from the database configuration.
    pub fn build(self) -> Result<ServerState> {
        let config = self
            .config
            .ok_or(ConfigError::MissingField("server config".into()))?;

        let pooled = match self.pooled {
            Some(executor) => executor,
            None => Arc::new(PooledExecutor::new(&config.database)?),
        };
        let direct = match self.direct {
            Some(executor) => executor,
            None => Arc::new(DirectExecutor::new(&config.database)?),
        };

        Ok(ServerState {
            gate: CredentialGate::new(config.security.api_key.clone()),
            validator: SqlValidator::from_config(&config.security),
            rate_limiter: RateLimiter::new(config.security.rate_limit),
            config,
            pooled,
            direct,
        })
    }
}
