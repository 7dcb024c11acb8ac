//! Configuration types and builders.
//!
//! Configuration is read once at startup and shared immutably afterwards. Loading goes
//! through a key/value map so that tests never touch the process environment.

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Table used when the allow-list is switched on without naming a table.
pub const DEFAULT_ALLOWED_TABLE: &str = "public.n8n";

/// Database connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL URL; carries credentials, so it is never serialized.
    #[serde(skip_serializing)]
    pub url: String,
    pub pool_size: u32,
    pub connection_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            pool_size: 10,
            connection_timeout: Duration::from_secs(30),
        }
    }
}

/// Builder for DatabaseConfig with fluent API.
#[derive(Default)]
pub struct DatabaseConfigBuilder {
    config: DatabaseConfig,
}

impl DatabaseConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = url.into();
        self
    }

    pub fn pool_size(mut self, size: u32) -> Self {
        self.config.pool_size = size;
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    pub fn build(self) -> ConfigResult<DatabaseConfig> {
        self.validate()?;
        Ok(self.config)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.config.url.trim().is_empty() {
            return Err(ConfigError::MissingField("DATABASE_URL".into()));
        }
        self.config
            .url
            .parse::<tokio_postgres::Config>()
            .map_err(|e| ConfigError::InvalidDatabaseUrl(e.to_string()))?;
        if self.config.pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "DATABASE_POOL_SIZE".into(),
                message: "Pool size must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

/// Requests allowed per caller within a time window, e.g. `100/hour`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub requests: u32,
    pub window: Duration,
}

impl RateLimit {
    pub fn new(requests: u32, window: Duration) -> Self {
        Self { requests, window }
    }

    /// Parse `"<n>/<unit>"` or `"<n> per <unit>"`, where unit is second, minute, hour or day
    /// (singular or plural).
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        let (count, unit) = s
            .split_once('/')
            .or_else(|| s.split_once(" per "))?;

        let requests: u32 = count.trim().parse().ok()?;
        if requests == 0 {
            return None;
        }

        let window = match unit.trim().trim_end_matches('s') {
            "second" | "sec" => Duration::from_secs(1),
            "minute" | "min" => Duration::from_secs(60),
            "hour" => Duration::from_secs(60 * 60),
            "day" => Duration::from_secs(24 * 60 * 60),
            _ => return None,
        };

        Some(Self { requests, window })
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self::new(100, Duration::from_secs(60 * 60))
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} per {:?}", self.requests, self.window)
    }
}

/// Whether a bare `;` is itself a forbidden token.
///
/// `Forbidden` blocks statement stacking at the lexical layer but also rejects a
/// harmless trailing semicolon. `Allowed` accepts trailing semicolons and relies on the
/// execution engine, which sends one statement per extended-protocol round trip, to
/// refuse stacked statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SeparatorPolicy {
    #[default]
    Forbidden,
    Allowed,
}

impl SeparatorPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forbidden => "forbidden",
            Self::Allowed => "allowed",
        }
    }
}

/// Security configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub rate_limit: RateLimit,
    /// Single table every query must be restricted to; `None` disables the allow-list.
    pub allowed_table: Option<String>,
    pub statement_separator: SeparatorPolicy,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: Cow<'static, str>,
    pub version: Cow<'static, str>,
    pub bind_addr: SocketAddr,
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").into(),
            version: env!("CARGO_PKG_VERSION").into(),
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8000),
            database: DatabaseConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Load from the process environment.
    pub fn from_env() -> ConfigResult<Self> {
        let vars: HashMap<String, String> = env::vars().collect();
        Self::from_kv(&vars)
    }

    /// Load from a key/value map using the same variable names as the environment.
    pub fn from_kv(kv: &HashMap<String, String>) -> ConfigResult<Self> {
        let get = |key: &str| {
            kv.get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        };

        let mut database = DatabaseConfigBuilder::new()
            .url(get("DATABASE_URL").ok_or(ConfigError::MissingField("DATABASE_URL".into()))?);
        if let Some(size) = get("DATABASE_POOL_SIZE") {
            database = database.pool_size(parse_number(size, "DATABASE_POOL_SIZE")?);
        }
        if let Some(secs) = get("DATABASE_CONNECT_TIMEOUT_SECS") {
            database = database.connection_timeout(Duration::from_secs(parse_number(
                secs,
                "DATABASE_CONNECT_TIMEOUT_SECS",
            )?));
        }

        let api_key = get("API_KEY")
            .or_else(|| get("REX_API_KEY"))
            .ok_or(ConfigError::MissingField("API_KEY".into()))?;

        let rate_limit = match get("RATE_LIMIT") {
            Some(raw) => RateLimit::parse(raw).ok_or_else(|| ConfigError::InvalidValue {
                field: "RATE_LIMIT".into(),
                message: format!("expected '<n>/<second|minute|hour|day>', got '{raw}'").into(),
            })?,
            None => RateLimit::default(),
        };

        let restrict = match get("RESTRICT_TO_TABLE") {
            Some(raw) => parse_bool(raw, "RESTRICT_TO_TABLE")?,
            None => false,
        };
        let allowed_table = restrict.then(|| {
            get("ALLOWED_TABLE")
                .unwrap_or(DEFAULT_ALLOWED_TABLE)
                .to_string()
        });

        let statement_separator = match get("FORBID_STATEMENT_SEPARATOR") {
            Some(raw) if !parse_bool(raw, "FORBID_STATEMENT_SEPARATOR")? => {
                SeparatorPolicy::Allowed
            }
            _ => SeparatorPolicy::Forbidden,
        };

        let mut builder = ServerConfig::builder()
            .database(database.build()?)
            .security(SecurityConfig {
                api_key: Some(api_key.to_string()),
                rate_limit,
                allowed_table,
                statement_separator,
            });

        if let Some(name) = get("SERVER_NAME") {
            builder = builder.name(name.to_string());
        }
        if let Some(addr) = get("BIND_ADDR") {
            builder = builder.bind_addr(addr.parse().map_err(|_| ConfigError::InvalidValue {
                field: "BIND_ADDR".into(),
                message: format!("invalid socket address '{addr}'").into(),
            })?);
        }

        Ok(builder.build())
    }
}

/// Builder for ServerConfig.
#[derive(Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    pub fn database(mut self, database: DatabaseConfig) -> Self {
        self.config.database = database;
        self
    }

    pub fn security(mut self, security: SecurityConfig) -> Self {
        self.config.security = security;
        self
    }

    pub fn build(self) -> ServerConfig {
        self.config
    }
}

fn parse_number<T: std::str::FromStr>(raw: &str, field: &'static str) -> ConfigResult<T> {
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        field: field.into(),
        message: format!("'{raw}' is not a valid number").into(),
    })
}

fn parse_bool(raw: &str, field: &'static str) -> ConfigResult<bool> {
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.into(),
            message: format!("'{raw}' is not a boolean").into(),
        }),
    }
}
