//! Saga state machine.

use chrono::{DateTime, Utc};
use common::{EventId, OrderId, ReservationId, Sku};
use inventory::LineItem;
use serde::{Deserialize, Serialize};

use crate::events::TriggerKind;

/// Where an order stands in the fulfillment saga.
///
/// ```text
/// Started ──┬──► StockReserved ──► AwaitingPayment ──┬──► Settled
///           │                                        └──► Compensating ──► Cancelled
///           └──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SagaStage {
    /// The order was accepted and stock is being reserved.
    Started,
    /// Stock is held; the reservation is being announced.
    StockReserved,
    /// Waiting for the payment outcome.
    AwaitingPayment,
    /// Stock confirmed (terminal state).
    Settled,
    /// Stock is being released.
    Compensating,
    /// The order will not be fulfilled (terminal state).
    Cancelled,
}

impl SagaStage {
    /// Returns true if this is a terminal stage.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaStage::Settled | SagaStage::Cancelled)
    }

    /// Returns the stage name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStage::Started => "Started",
            SagaStage::StockReserved => "StockReserved",
            SagaStage::AwaitingPayment => "AwaitingPayment",
            SagaStage::Settled => "Settled",
            SagaStage::Compensating => "Compensating",
            SagaStage::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for SagaStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The step a stuck saga will run when resumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step")]
pub enum PendingStep {
    /// Reserve the order's line items.
    Reserve { items: Vec<LineItem> },
    /// Emit `StockReserved` and start waiting for payment.
    AnnounceReservation,
    /// Emit `StockReservationFailed` and cancel.
    AnnounceRejection { reason: String, sku: Option<Sku> },
    /// Confirm the reservation and settle.
    Confirm,
    /// Release the reservation and cancel.
    Release { reason: String },
}

impl PendingStep {
    pub fn name(&self) -> &'static str {
        match self {
            PendingStep::Reserve { .. } => "reserve",
            PendingStep::AnnounceReservation => "announce_reservation",
            PendingStep::AnnounceRejection { .. } => "announce_rejection",
            PendingStep::Confirm => "confirm",
            PendingStep::Release { .. } => "release",
        }
    }
}

/// Why a saga stopped making progress, and how to continue it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StuckInfo {
    pub step: PendingStep,
    /// Sanitized description of the last failure.
    pub reason: String,
    pub since: DateTime<Utc>,
}

/// Persisted state of one order's saga.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaState {
    pub order_id: OrderId,
    pub stage: SagaStage,
    pub reservation_id: Option<ReservationId>,
    /// The last inbound event applied to this saga.
    pub last_event_id: Option<EventId>,
    /// Reason code when the saga ended in `Cancelled`.
    pub cancel_reason: Option<String>,
    /// Set while the saga waits for operator intervention.
    pub stuck: Option<StuckInfo>,
    /// Optimistic concurrency counter, starting at 1.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SagaState {
    /// A fresh saga for a newly created order.
    pub fn started(order_id: OrderId, event_id: EventId, now: DateTime<Utc>) -> Self {
        Self {
            order_id,
            stage: SagaStage::Started,
            reservation_id: None,
            last_event_id: Some(event_id),
            cancel_reason: None,
            stuck: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_stuck(&self) -> bool {
        self.stuck.is_some()
    }
}

/// Why an event is acknowledged without side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckReason {
    /// The saga has already moved past what this event asks for.
    Duplicate,
    /// Payment arrived after the order was cancelled.
    LatePayment,
    /// The event no longer applies to the saga's outcome.
    Stale,
}

impl AckReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckReason::Duplicate => "duplicate",
            AckReason::LatePayment => "late_payment",
            AckReason::Stale => "stale",
        }
    }
}

/// What the coordinator should do with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Open the saga and reserve stock.
    Reserve,
    /// Confirm the reservation.
    Confirm,
    /// Release the reservation and cancel.
    Compensate,
    /// Acknowledge with no side effect.
    Acknowledge(AckReason),
    /// The saga is not ready for this event yet.
    Defer,
}

/// The transition table, keyed by (stage, event type).
///
/// `None` means no saga exists for the order yet.
pub fn next_action(stage: Option<SagaStage>, kind: TriggerKind) -> Action {
    use SagaStage::*;
    use TriggerKind as K;

    match (stage, kind) {
        (None, K::OrderCreated) => Action::Reserve,
        (None, _) => Action::Defer,
        (Some(_), K::OrderCreated) => Action::Acknowledge(AckReason::Duplicate),

        (Some(Started | StockReserved), _) => Action::Defer,

        (Some(AwaitingPayment), K::PaymentSucceeded) => Action::Confirm,
        (Some(AwaitingPayment), K::PaymentFailed | K::ReservationExpired) => Action::Compensate,

        (Some(Settled), K::PaymentSucceeded) => Action::Acknowledge(AckReason::Duplicate),
        (Some(Settled), K::PaymentFailed | K::ReservationExpired) => {
            Action::Acknowledge(AckReason::Stale)
        }

        (Some(Compensating | Cancelled), K::PaymentSucceeded) => {
            Action::Acknowledge(AckReason::LatePayment)
        }
        (Some(Compensating | Cancelled), K::PaymentFailed | K::ReservationExpired) => {
            Action::Acknowledge(AckReason::Duplicate)
        }
    }
}
