//! HTTP handlers.
//!
//! Every query request runs the same pipeline: credential gate, rate limiter,
//! validator, read-only executor. Validation failures never reach the database.

use crate::database::{ConnectionStrategy, Record};
use crate::error::{GatewayError, RequestError, Result};
use crate::security::RejectionReason;
use crate::server::state::ServerState;
use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{ConnectInfo, FromRequestParts, Query, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::{Value, json};
use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Header carrying the API key on POST requests.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Rate-limit key for the caller: the peer IP of the accepted socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity(String);

impl CallerIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let identity = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Ok(Self(identity))
    }
}

/// Query-string parameters for GET requests.
#[derive(Debug, Deserialize)]
pub struct QueryParams {
    pub sqlquery: Option<String>,
    pub api_key: Option<String>,
}

/// JSON body for POST requests.
#[derive(Debug, Deserialize)]
pub struct QueryBody {
    pub sqlquery: Option<String>,
}

pub async fn query_get(
    State(state): State<Arc<ServerState>>,
    caller: CallerIdentity,
    params: std::result::Result<Query<QueryParams>, QueryRejection>,
) -> Result<Json<Vec<Record>>> {
    handle_get(&state, ConnectionStrategy::Pooled, &caller, params).await
}

pub async fn direct_query_get(
    State(state): State<Arc<ServerState>>,
    caller: CallerIdentity,
    params: std::result::Result<Query<QueryParams>, QueryRejection>,
) -> Result<Json<Vec<Record>>> {
    handle_get(&state, ConnectionStrategy::Direct, &caller, params).await
}

pub async fn query_post(
    State(state): State<Arc<ServerState>>,
    caller: CallerIdentity,
    headers: HeaderMap,
    body: std::result::Result<Json<QueryBody>, JsonRejection>,
) -> Result<Json<Vec<Record>>> {
    handle_post(&state, ConnectionStrategy::Pooled, &caller, &headers, body).await
}

pub async fn direct_query_post(
    State(state): State<Arc<ServerState>>,
    caller: CallerIdentity,
    headers: HeaderMap,
    body: std::result::Result<Json<QueryBody>, JsonRejection>,
) -> Result<Json<Vec<Record>>> {
    handle_post(&state, ConnectionStrategy::Direct, &caller, &headers, body).await
}

async fn handle_get(
    state: &ServerState,
    strategy: ConnectionStrategy,
    caller: &CallerIdentity,
    params: std::result::Result<Query<QueryParams>, QueryRejection>,
) -> Result<Json<Vec<Record>>> {
    let Query(params) = params
        .map_err(|e| reject_request(caller, None, RequestError::Malformed(e.body_text())))?;
    let sql = params.sqlquery.ok_or_else(|| {
        reject_request(caller, None, RequestError::MissingParameter("sqlquery"))
    })?;
    let api_key = params.api_key.ok_or_else(|| {
        reject_request(caller, Some(sql.as_str()), RequestError::MissingParameter("api_key"))
    })?;

    run_query(state, strategy, caller, &api_key, &sql).await
}

async fn handle_post(
    state: &ServerState,
    strategy: ConnectionStrategy,
    caller: &CallerIdentity,
    headers: &HeaderMap,
    body: std::result::Result<Json<QueryBody>, JsonRejection>,
) -> Result<Json<Vec<Record>>> {
    let Json(body) = body
        .map_err(|e| reject_request(caller, None, RequestError::Malformed(e.body_text())))?;
    let sql = body.sqlquery.ok_or_else(|| {
        reject_request(caller, None, RequestError::MissingParameter("sqlquery"))
    })?;
    let api_key = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            let error = RequestError::MissingParameter(API_KEY_HEADER);
            reject_request(caller, Some(sql.as_str()), error)
        })?;

    run_query(state, strategy, caller, api_key, &sql).await
}

async fn run_query(
    state: &ServerState,
    strategy: ConnectionStrategy,
    caller: &CallerIdentity,
    presented_key: &str,
    raw_sql: &str,
) -> Result<Json<Vec<Record>>> {
    if let Err(e) = state.gate.check(presented_key) {
        warn!(caller = %caller, "Rejected request with invalid API key");
        return Err(e.into());
    }

    state.rate_limiter.check(caller.as_str()).inspect_err(|e| {
        warn!(caller = %caller, query = raw_sql, "Request throttled: {}", e);
    })?;

    let verdict = state.validator.validate(raw_sql).inspect_err(|e| {
        warn!(
            caller = %caller,
            reason = ?RejectionReason::of(e),
            query = raw_sql,
            "Query rejected: {}", e
        );
    })?;

    let executor = state.executor(strategy);
    debug!(caller = %caller, executor = executor.name(), "SQL Query: {}", verdict.sql());

    let result = executor.execute(verdict.sql()).await.inspect_err(|e| {
        error!(
            caller = %caller,
            executor = executor.name(),
            query = verdict.sql(),
            "Query failed: {}", e
        );
    })?;

    debug!(
        "Query executed successfully via {} connection, returned {} rows",
        executor.name(),
        result.row_count
    );
    Ok(Json(result.rows))
}

fn reject_request(
    caller: &CallerIdentity,
    query: Option<&str>,
    error: RequestError,
) -> GatewayError {
    warn!(
        caller = %caller,
        query = query.unwrap_or_default(),
        "Rejected malformed request: {}", error
    );
    error.into()
}

/// Liveness probe for `/` and `/health`. Unauthenticated and not rate limited.
pub async fn health(State(state): State<Arc<ServerState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "name": state.config.name,
        "version": state.config.version,
        "statement_separator": state.validator.active_separator_policy().as_str(),
        "table_restriction": state.validator.table_restriction().is_some(),
    }))
}

pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "detail": "Not Found" })))
}
