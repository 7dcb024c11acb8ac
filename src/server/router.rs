//! Route table.

use crate::server::handler;
use crate::server::state::ServerState;
use axum::Router;
use axum::routing::get;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the HTTP router.
///
/// `/query` borrows pooled sessions, `/query/direct` opens a connection per request.
/// The trailing-slash GET paths are kept for clients of the earlier URL scheme.
pub fn create_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/", get(handler::health))
        .route("/health", get(handler::health))
        .route("/query", get(handler::query_get).post(handler::query_post))
        .route(
            "/query/direct",
            get(handler::direct_query_get).post(handler::direct_query_post),
        )
        .route("/sqlquery_alchemy/", get(handler::query_get))
        .route("/sqlquery_direct/", get(handler::direct_query_get))
        .fallback(handler::not_found)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
