use thiserror::Error;

/// Errors raised by the consumer plumbing itself, never by handlers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsumerError {
    /// The consumer has shut down and accepts no more events.
    #[error("Consumer is closed")]
    Closed,

    /// A dead letter or marker could not be stored.
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Convenience type alias for consumer results.
pub type Result<T> = std::result::Result<T, ConsumerError>;
