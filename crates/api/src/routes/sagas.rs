//! Operator endpoints for saga inspection and recovery.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::OrderId;
use saga::SagaState;

use crate::error::ApiError;
use crate::state::AppState;

/// `GET /sagas/{order_id}`
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<OrderId>,
) -> Result<Json<SagaState>, ApiError> {
    let saga = state
        .coordinator
        .get_saga(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Saga not found: {order_id}")))?;
    Ok(Json(saga))
}

/// `GET /sagas/stuck`: sagas waiting for operator intervention, oldest first.
pub async fn stuck(State(state): State<Arc<AppState>>) -> Result<Json<Vec<SagaState>>, ApiError> {
    Ok(Json(state.coordinator.list_stuck().await?))
}

/// `POST /sagas/{order_id}/resume`: re-runs the pending step of a stuck saga.
pub async fn resume(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<OrderId>,
) -> Result<Json<SagaState>, ApiError> {
    tracing::info!(%order_id, "operator resume requested");
    let saga = state.coordinator.resume(order_id).await?;
    Ok(Json(saga))
}
