use async_trait::async_trait;
use thiserror::Error;

use crate::event::InboundEvent;

/// Why a handler could not finish an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// Something failed along the way; delivering again may succeed.
    #[error("{0}")]
    Retryable(String),

    /// The event depends on state that has not been reached yet.
    #[error("out of order: {0}")]
    OutOfOrder(String),
}

/// Receives deduplicated events, one order at a time.
///
/// Returning `Ok` acknowledges the event. Business outcomes, including
/// rejections, are `Ok`: they are expressed as emitted events, not errors.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &InboundEvent) -> Result<(), HandlerError>;
}
