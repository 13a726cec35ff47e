//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub partitions: usize,
    pub dead_letters: usize,
}

/// `GET /health`: liveness plus intake backlog indicators.
pub async fn check(
    State(state): State<Arc<AppState>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        partitions: state.intake.partitions(),
        dead_letters: state.dead_letters.len().await,
    })
}
