//! Event intake and outbox views.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use common::EventId;
use consumer::{DeadLetter, EventSink, InboundEvent};
use saga::OutboundEvent;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub event_id: EventId,
    pub partition: usize,
}

/// `POST /events`: hands an event to the partitioned intake.
///
/// Accepted events are processed asynchronously; redeliveries of the same
/// `event_id` are deduplicated by the consumer.
pub async fn publish(
    State(state): State<Arc<AppState>>,
    Json(event): Json<InboundEvent>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    if event.event_type.is_empty() {
        return Err(ApiError::BadRequest("event type is required".to_string()));
    }

    let response = AcceptedResponse {
        event_id: event.event_id,
        partition: state.intake.partition_for(&event.correlation_id),
    };
    let event_type = event.event_type.clone();
    state.intake.publish(event).await?;
    metrics::counter!("api_events_accepted_total", "event_type" => event_type).increment(1);
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// `GET /dead-letters`
pub async fn dead_letters(
    State(state): State<Arc<AppState>>,
) -> Json<Vec<DeadLetter>> {
    Json(state.dead_letters.list().await)
}

/// `GET /outbound-events`: everything the coordinator emitted, oldest first.
pub async fn outbound(
    State(state): State<Arc<AppState>>,
) -> Json<Vec<OutboundEvent>> {
    Json(state.outbox.events().await)
}
