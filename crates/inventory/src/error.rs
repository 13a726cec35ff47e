//! Inventory error taxonomy.

use ledger::{LedgerError, ReservationId, ReservationStatus, Sku};
use thiserror::Error;

/// How callers should react to an [`InventoryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The request can never succeed as-is; surface it, do not retry.
    Business,
    /// A fault in this process (bad data, a bug); retry a bounded number of times.
    Application,
    /// Storage or contention trouble; retry with backoff.
    Infrastructure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Business => "business",
            ErrorKind::Application => "application",
            ErrorKind::Infrastructure => "infrastructure",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors returned by the reservation manager.
///
/// Storage details never leak through this type: ledger failures are
/// logged where they happen and reduced to a message-free variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InventoryError {
    #[error("Insufficient stock for {sku}: requested {requested}, available {available}")]
    InsufficientStock {
        sku: Sku,
        requested: i64,
        available: i64,
    },

    #[error("Invalid quantity {quantity} for {sku}")]
    InvalidQuantity { sku: Sku, quantity: i64 },

    #[error("Unknown SKU: {0}")]
    UnknownSku(Sku),

    #[error("Order has no line items")]
    EmptyOrder,

    #[error("Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    #[error("Reservation {reservation_id} is {status}")]
    InvalidReservationState {
        reservation_id: ReservationId,
        status: ReservationStatus,
    },

    #[error("SKU already registered with a different quantity: {0}")]
    SkuAlreadyRegistered(Sku),

    #[error("Cannot set {sku} on hand to {on_hand}: {reserved} units are reserved")]
    AdjustmentBelowReserved {
        sku: Sku,
        on_hand: i64,
        reserved: i64,
    },

    #[error("Gave up after {attempts} conflicting writes")]
    ConcurrencyExhausted { attempts: u32 },

    #[error("Inventory storage unavailable")]
    Unavailable,

    #[error("Internal inventory error: {0}")]
    Internal(String),
}

impl InventoryError {
    /// Classifies the error for retry and dead-letter decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            InventoryError::InsufficientStock { .. }
            | InventoryError::InvalidQuantity { .. }
            | InventoryError::UnknownSku(_)
            | InventoryError::EmptyOrder
            | InventoryError::ReservationNotFound(_)
            | InventoryError::InvalidReservationState { .. }
            | InventoryError::SkuAlreadyRegistered(_)
            | InventoryError::AdjustmentBelowReserved { .. } => ErrorKind::Business,
            InventoryError::Internal(_) => ErrorKind::Application,
            InventoryError::ConcurrencyExhausted { .. } | InventoryError::Unavailable => {
                ErrorKind::Infrastructure
            }
        }
    }

    /// Returns true if retrying later may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Infrastructure
    }

    /// Stable code safe to put in outbound events.
    pub fn reason_code(&self) -> &'static str {
        match self {
            InventoryError::InsufficientStock { .. } => "insufficient_stock",
            InventoryError::InvalidQuantity { .. } | InventoryError::EmptyOrder => {
                "invalid_quantity"
            }
            InventoryError::UnknownSku(_) => "unknown_sku",
            InventoryError::ReservationNotFound(_) => "reservation_not_found",
            InventoryError::InvalidReservationState { .. } => "invalid_reservation_state",
            InventoryError::SkuAlreadyRegistered(_) => "sku_already_registered",
            InventoryError::AdjustmentBelowReserved { .. } => "adjustment_below_reserved",
            InventoryError::ConcurrencyExhausted { .. } => "concurrency_exhausted",
            InventoryError::Unavailable => "unavailable",
            InventoryError::Internal(_) => "internal_error",
        }
    }

    /// The SKU a business rejection is about, if any.
    pub fn sku(&self) -> Option<&Sku> {
        match self {
            InventoryError::InsufficientStock { sku, .. }
            | InventoryError::InvalidQuantity { sku, .. }
            | InventoryError::UnknownSku(sku)
            | InventoryError::SkuAlreadyRegistered(sku)
            | InventoryError::AdjustmentBelowReserved { sku, .. } => Some(sku),
            _ => None,
        }
    }
}

impl From<LedgerError> for InventoryError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::RecordNotFound(sku) => InventoryError::UnknownSku(sku),
            LedgerError::RecordExists(sku) => InventoryError::SkuAlreadyRegistered(sku),
            LedgerError::ReservationNotFound(id) => InventoryError::ReservationNotFound(id),
            err if err.is_infrastructure() => {
                tracing::error!(error = %err, "inventory ledger unavailable");
                InventoryError::Unavailable
            }
            err => {
                tracing::error!(error = %err, "inventory ledger rejected write");
                InventoryError::Internal(err.to_string())
            }
        }
    }
}

/// Convenience type alias for inventory results.
pub type Result<T> = std::result::Result<T, InventoryError>;
