//! Application routing
//!
//! This module defines all HTTP routes for the application.

use axum::{
    http::HeaderName,
    middleware,
    routing::{any, get},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::api::{bridge, health, metrics};
use crate::middleware::{log_request, REQUEST_ID_HEADER, TRACE_ID_HEADER};
use crate::server::state::AppState;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    // Bridging and counter routes accept every verb and answer unsupported
    // ones with the bridge's own 405 envelope.
    let bridge_routes = Router::new()
        .route("/", any(bridge::bridge))
        .route("/api", any(bridge::bridge));

    let metrics_routes = Router::new()
        .route("/metrics", any(metrics::snapshot))
        .route("/stats", any(metrics::snapshot))
        .route("/metrics/prometheus", get(metrics::prometheus));

    Router::new()
        .merge(bridge_routes)
        .merge(metrics_routes)
        .route("/health", get(health::health_check))
        // Apply middleware layers (order matters: last added = outermost = runs first)
        .layer(create_cors_layer())
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

/// Create CORS layer with permissive settings
fn create_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([
            HeaderName::from_static(TRACE_ID_HEADER),
            HeaderName::from_static(REQUEST_ID_HEADER),
        ])
}
