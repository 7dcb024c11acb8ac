//! Error types for the gateway.
//!
//! Uses `thiserror` for ergonomic error definitions with automatic `From` conversions.
//! [`GatewayError`] is the only type that crosses the HTTP boundary; it owns the
//! mapping to status codes and the `{"detail": ...}` response body.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::borrow::Cow;
use thiserror::Error;

/// Main error type for the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Security(#[from] SecurityError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Server misconfigured: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Request(#[from] RequestError),

    #[error("Internal error: {message}")]
    Internal { message: Cow<'static, str> },
}

impl GatewayError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Security(e) => e.status_code(),
            Self::Request(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Database(_) | Self::Config(_) | Self::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Short client-visible message.
    pub fn detail(&self) -> String {
        self.to_string()
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "detail": self.detail() }));
        (self.status_code(), body).into_response()
    }
}

/// Caller-facing policy errors: credentials, throttling and SQL validation.
#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("Invalid API key")]
    Unauthorized,

    #[error("Rate limit exceeded. Please try again later or contact your administrator.")]
    RateLimited,

    #[error("Only SELECT statements are allowed.")]
    NotASelect,

    #[error("Forbidden token/statement detected.")]
    ForbiddenToken { token: String },

    #[error("Query must reference a table.")]
    NoTableReference,

    #[error("Only {allowed} is allowed (found reference to '{found}').")]
    TableNotAllowed { allowed: String, found: String },
}

impl SecurityError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::NotASelect | Self::ForbiddenToken { .. } | Self::NoTableReference => {
                StatusCode::BAD_REQUEST
            }
            Self::TableNotAllowed { .. } => StatusCode::FORBIDDEN,
        }
    }
}

/// Database-related errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection pool exhausted")]
    PoolExhausted,

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Session is not read-only: {0}")]
    NotReadOnly(String),
}

impl DatabaseError {
    /// Prefer the server-reported message over the driver's wrapper text.
    fn describe(e: &tokio_postgres::Error) -> String {
        match e.as_db_error() {
            Some(db) => db.message().to_string(),
            None => e.to_string(),
        }
    }

    pub fn query(e: tokio_postgres::Error) -> Self {
        Self::QueryFailed(Self::describe(&e))
    }

    pub fn transaction(e: tokio_postgres::Error) -> Self {
        Self::Transaction(Self::describe(&e))
    }

    pub fn connection(e: tokio_postgres::Error) -> Self {
        Self::ConnectionFailed(Self::describe(&e))
    }
}

impl From<deadpool_postgres::PoolError> for DatabaseError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        match e {
            deadpool_postgres::PoolError::Timeout(_) => Self::PoolExhausted,
            deadpool_postgres::PoolError::Backend(e) => Self::connection(e),
            other => Self::ConnectionFailed(other.to_string()),
        }
    }
}

/// Configuration errors. Raised only at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(Cow<'static, str>),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue {
        field: Cow<'static, str>,
        message: Cow<'static, str>,
    },

    #[error("Invalid database URL: {0}")]
    InvalidDatabaseUrl(String),
}

/// Malformed inbound requests, rejected before any policy runs.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid request: {0}")]
    Malformed(String),
}

/// Result type alias for GatewayError.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Result type alias for DatabaseError.
pub type DbResult<T> = std::result::Result<T, DatabaseError>;

/// Result type alias for SecurityError.
pub type SecurityResult<T> = std::result::Result<T, SecurityError>;

/// Result type alias for ConfigError.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_status_codes() {
        assert_eq!(
            SecurityError::Unauthorized.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            SecurityError::RateLimited.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(SecurityError::NotASelect.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            SecurityError::NoTableReference.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            SecurityError::TableNotAllowed {
                allowed: "public.orders".into(),
                found: "users".into(),
            }
            .status_code(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn test_gateway_status_codes() {
        let db: GatewayError = DatabaseError::QueryFailed("boom".into()).into();
        assert_eq!(db.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let missing: GatewayError = RequestError::MissingParameter("api_key").into();
        assert_eq!(missing.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let config: GatewayError = ConfigError::MissingField("API_KEY".into()).into();
        assert_eq!(config.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_detail_messages() {
        let limited: GatewayError = SecurityError::RateLimited.into();
        assert_eq!(
            limited.detail(),
            "Rate limit exceeded. Please try again later or contact your administrator."
        );

        let forbidden: GatewayError = SecurityError::ForbiddenToken {
            token: "drop".into(),
        }
        .into();
        assert_eq!(forbidden.detail(), "Forbidden token/statement detected.");

        let db: GatewayError =
            DatabaseError::QueryFailed("cannot execute CREATE TABLE".into()).into();
        assert_eq!(
            db.detail(),
            "Database error: Query execution failed: cannot execute CREATE TABLE"
        );
    }
}
