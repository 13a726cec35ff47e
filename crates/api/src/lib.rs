//! HTTP surface and process wiring for the order fulfillment core.
//!
//! Exposes stock reads and catalog intake, the event intake that feeds the
//! saga coordinator, and operator views over sagas, dead letters, and
//! emitted events, with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use error::ApiError;
pub use state::{AppState, create_state};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/inventory/{sku}",
            get(routes::inventory::get).put(routes::inventory::put),
        )
        .route(
            "/inventory/{sku}/availability",
            get(routes::inventory::availability),
        )
        .route("/events", post(routes::events::publish))
        .route("/dead-letters", get(routes::events::dead_letters))
        .route("/outbound-events", get(routes::events::outbound))
        .route("/sagas/stuck", get(routes::sagas::stuck))
        .route("/sagas/{order_id}", get(routes::sagas::get))
        .route("/sagas/{order_id}/resume", post(routes::sagas::resume))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
