//! Saga error types.

use common::OrderId;
use thiserror::Error;

use crate::state::SagaStage;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// No saga exists for the order.
    #[error("Saga not found: {0}")]
    NotFound(OrderId),

    /// A saga for the order already exists.
    #[error("Saga already exists: {0}")]
    AlreadyExists(OrderId),

    /// The saga row changed since it was read.
    #[error("Saga {order_id} version conflict: expected {expected}, found {actual}")]
    VersionConflict {
        order_id: OrderId,
        expected: u64,
        actual: u64,
    },

    /// The event cannot be applied in the saga's current stage yet.
    #[error("{event_type} is not applicable to saga {order_id} in stage {stage:?}")]
    OutOfOrder {
        order_id: OrderId,
        stage: Option<SagaStage>,
        event_type: String,
    },

    /// The saga is waiting for operator intervention.
    #[error("Saga {0} is stuck")]
    Stuck(OrderId),

    /// Resume was requested for a saga that is not stuck.
    #[error("Saga {0} is not stuck")]
    NotStuck(OrderId),

    /// An inbound event does not match its contract.
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// An outbound event could not be published.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// The saga store failed.
    #[error("Saga store error: {0}")]
    Store(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
