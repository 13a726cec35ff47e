use thiserror::Error;

use crate::{ReservationId, ReservationStatus, Sku, Version};

/// Errors that can occur when interacting with the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A record was modified since it was read.
    #[error("Version conflict for sku {sku}: expected version {expected}, found {actual}")]
    VersionConflict {
        sku: Sku,
        expected: Version,
        actual: Version,
    },

    /// A reservation was not in the status the write was conditioned on.
    #[error(
        "Reservation {reservation_id} conflict: expected status {expected}, found {actual}"
    )]
    ReservationConflict {
        reservation_id: ReservationId,
        expected: ReservationStatus,
        actual: ReservationStatus,
    },

    /// PostgreSQL aborted the transaction to break a deadlock or serialization cycle.
    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    /// A record for this SKU already exists.
    #[error("Inventory record already exists: {0}")]
    RecordExists(Sku),

    /// No record exists for this SKU.
    #[error("Inventory record not found: {0}")]
    RecordNotFound(Sku),

    /// A reservation with this ID already exists.
    #[error("Reservation already exists: {0}")]
    ReservationExists(ReservationId),

    /// No reservation exists with this ID.
    #[error("Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    /// A write would have broken `0 <= reserved <= on_hand`.
    #[error("Invariant violation for sku {sku}: on_hand={on_hand}, reserved={reserved}")]
    InvariantViolation {
        sku: Sku,
        on_hand: i64,
        reserved: i64,
    },

    /// The backing store cannot be reached.
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored value could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LedgerError {
    /// Returns true for optimistic-concurrency failures that are worth re-reading and retrying.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            LedgerError::VersionConflict { .. }
                | LedgerError::ReservationConflict { .. }
                | LedgerError::TransactionAborted(_)
        )
    }

    /// Returns true when the store itself failed rather than the request.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_) | LedgerError::Database(_))
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aborted_transactions_are_retried_as_conflicts() {
        let err = LedgerError::TransactionAborted("deadlock detected".into());
        assert!(err.is_conflict());
        assert!(!err.is_infrastructure());
    }

    #[test]
    fn outages_are_not_conflicts() {
        let err = LedgerError::Unavailable("offline".into());
        assert!(!err.is_conflict());
        assert!(err.is_infrastructure());
    }
}
