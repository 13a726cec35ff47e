//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use consumer::ConsumerError;
use inventory::{ErrorKind, InventoryError};
use saga::SagaError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Reservation or catalog error.
    Inventory(InventoryError),
    /// Saga lookup or resume error.
    Saga(SagaError),
    /// The event intake rejected the event.
    Intake(ConsumerError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Inventory(err) => inventory_error_to_response(err),
            ApiError::Saga(err) => saga_error_to_response(err),
            ApiError::Intake(err) => {
                tracing::warn!(error = %err, "event intake unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, "unavailable", err.to_string())
            }
        };

        let body = serde_json::json!({ "error": message, "code": code });
        (status, axum::Json(body)).into_response()
    }
}

fn inventory_error_to_response(err: InventoryError) -> (StatusCode, &'static str, String) {
    let code = err.reason_code();
    let status = match &err {
        InventoryError::UnknownSku(_) | InventoryError::ReservationNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        InventoryError::InvalidQuantity { .. } | InventoryError::EmptyOrder => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        _ => match err.kind() {
            ErrorKind::Business | ErrorKind::Application => StatusCode::CONFLICT,
            ErrorKind::Infrastructure => StatusCode::SERVICE_UNAVAILABLE,
        },
    };

    if let InventoryError::Internal(detail) = &err {
        tracing::error!(error = %detail, "internal inventory error");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            code,
            "internal error".to_string(),
        );
    }
    if status == StatusCode::SERVICE_UNAVAILABLE {
        return (status, code, "inventory is temporarily unavailable".to_string());
    }
    (status, code, err.to_string())
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, &'static str, String) {
    match &err {
        SagaError::NotFound(_) => (StatusCode::NOT_FOUND, "saga_not_found", err.to_string()),
        SagaError::NotStuck(_) => (StatusCode::CONFLICT, "saga_not_stuck", err.to_string()),
        SagaError::AlreadyExists(_)
        | SagaError::VersionConflict { .. }
        | SagaError::OutOfOrder { .. }
        | SagaError::Stuck(_) => (StatusCode::CONFLICT, "saga_conflict", err.to_string()),
        SagaError::MalformedEvent(_) | SagaError::Serialization(_) => {
            (StatusCode::BAD_REQUEST, "malformed_event", err.to_string())
        }
        SagaError::Publish(_) | SagaError::Store(_) => {
            tracing::error!(error = %err, "saga dependency unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "unavailable",
                "saga dependencies are temporarily unavailable".to_string(),
            )
        }
    }
}

impl From<InventoryError> for ApiError {
    fn from(err: InventoryError) -> Self {
        ApiError::Inventory(err)
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

impl From<ConsumerError> for ApiError {
    fn from(err: ConsumerError) -> Self {
        ApiError::Intake(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Sku;

    #[test]
    fn test_inventory_status_codes() {
        let cases = [
            (InventoryError::UnknownSku(Sku::new("A")), StatusCode::NOT_FOUND),
            (
                InventoryError::InsufficientStock {
                    sku: Sku::new("A"),
                    requested: 5,
                    available: 1,
                },
                StatusCode::CONFLICT,
            ),
            (
                InventoryError::InvalidQuantity {
                    sku: Sku::new("A"),
                    quantity: 0,
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                InventoryError::Unavailable,
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), expected);
        }
    }

    #[test]
    fn test_saga_status_codes() {
        let order_id = common::OrderId::new();
        assert_eq!(
            ApiError::from(SagaError::NotFound(order_id))
                .into_response()
                .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(SagaError::NotStuck(order_id))
                .into_response()
                .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(SagaError::Store("down".into()))
                .into_response()
                .status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
