//! API route definitions.

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::handlers;
use super::state::AppState;
use crate::auth::auth_middleware;

/// Create the application router.
///
/// The router expects a `PeerCertificates` extension on every request; the
/// server adds it per connection.
pub fn create_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let protected_routes = Router::new()
        .route("/start", post(handlers::start))
        .route("/stop", post(handlers::stop))
        .route("/list", get(handlers::list))
        .route("/status", get(handlers::status))
        .route("/log", get(handlers::log))
        .route("/purge", post(handlers::purge))
        .layer(middleware::from_fn_with_state(
            state.identity.clone(),
            auth_middleware,
        ))
        .with_state(state.clone());

    let public_routes = Router::new()
        .route("/health", get(handlers::health))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(trace_layer)
}
