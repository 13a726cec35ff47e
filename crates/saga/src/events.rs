//! Event contracts at the saga boundary.
//!
//! Inbound events arrive as [`InboundEvent`]s with an undecoded payload and
//! are parsed into a [`SagaTrigger`]. Everything the saga emits is a
//! [`FulfillmentEvent`] wrapped in an [`OutboundEvent`] envelope.

use chrono::{DateTime, Utc};
use common::{EventId, OrderId, ReservationId, Sku};
use consumer::InboundEvent;
use inventory::LineItem;
use serde::{Deserialize, Serialize};

use crate::error::SagaError;

pub const ORDER_CREATED: &str = "OrderCreated";
pub const PAYMENT_SUCCEEDED: &str = "PaymentSucceeded";
pub const PAYMENT_FAILED: &str = "PaymentFailed";
pub const RESERVATION_EXPIRED: &str = "ReservationExpired";

/// Payload of `OrderCreated`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub order_id: OrderId,
    pub items: Vec<LineItem>,
    pub customer_id: String,
}

/// Payload of `PaymentSucceeded`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSucceeded {
    pub order_id: OrderId,
}

/// Payload of `PaymentFailed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFailed {
    pub order_id: OrderId,
    pub reason: String,
}

/// Payload of `ReservationExpired`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationExpired {
    pub order_id: OrderId,
    pub reservation_id: ReservationId,
}

/// The kinds of inbound event that drive the saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    OrderCreated,
    PaymentSucceeded,
    PaymentFailed,
    ReservationExpired,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::OrderCreated => ORDER_CREATED,
            TriggerKind::PaymentSucceeded => PAYMENT_SUCCEEDED,
            TriggerKind::PaymentFailed => PAYMENT_FAILED,
            TriggerKind::ReservationExpired => RESERVATION_EXPIRED,
        }
    }
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A decoded inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SagaTrigger {
    OrderCreated(OrderCreated),
    PaymentSucceeded(PaymentSucceeded),
    PaymentFailed(PaymentFailed),
    ReservationExpired(ReservationExpired),
}

impl SagaTrigger {
    /// Decodes an inbound event.
    ///
    /// Returns `Ok(None)` for event types the saga does not react to.
    pub fn parse(event: &InboundEvent) -> Result<Option<Self>, SagaError> {
        let payload = event.payload.clone();
        let trigger = match event.event_type.as_str() {
            ORDER_CREATED => SagaTrigger::OrderCreated(serde_json::from_value(payload)?),
            PAYMENT_SUCCEEDED => SagaTrigger::PaymentSucceeded(serde_json::from_value(payload)?),
            PAYMENT_FAILED => SagaTrigger::PaymentFailed(serde_json::from_value(payload)?),
            RESERVATION_EXPIRED => {
                SagaTrigger::ReservationExpired(serde_json::from_value(payload)?)
            }
            _ => return Ok(None),
        };

        if trigger.order_id() != event.correlation_id {
            return Err(SagaError::MalformedEvent(format!(
                "payload order {} does not match correlation id {}",
                trigger.order_id(),
                event.correlation_id
            )));
        }
        Ok(Some(trigger))
    }

    pub fn kind(&self) -> TriggerKind {
        match self {
            SagaTrigger::OrderCreated(_) => TriggerKind::OrderCreated,
            SagaTrigger::PaymentSucceeded(_) => TriggerKind::PaymentSucceeded,
            SagaTrigger::PaymentFailed(_) => TriggerKind::PaymentFailed,
            SagaTrigger::ReservationExpired(_) => TriggerKind::ReservationExpired,
        }
    }

    pub fn order_id(&self) -> OrderId {
        match self {
            SagaTrigger::OrderCreated(e) => e.order_id,
            SagaTrigger::PaymentSucceeded(e) => e.order_id,
            SagaTrigger::PaymentFailed(e) => e.order_id,
            SagaTrigger::ReservationExpired(e) => e.order_id,
        }
    }
}

/// Events the fulfillment core emits.
///
/// `reason` fields only ever carry sanitized reason codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FulfillmentEvent {
    StockReserved {
        order_id: OrderId,
        reservation_id: ReservationId,
    },
    StockReservationFailed {
        order_id: OrderId,
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sku: Option<Sku>,
    },
    StockConfirmed {
        order_id: OrderId,
    },
    StockReleased {
        order_id: OrderId,
        reason: String,
    },
    ReservationExpired {
        order_id: OrderId,
        reservation_id: ReservationId,
    },
}

impl FulfillmentEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            FulfillmentEvent::StockReserved { .. } => "StockReserved",
            FulfillmentEvent::StockReservationFailed { .. } => "StockReservationFailed",
            FulfillmentEvent::StockConfirmed { .. } => "StockConfirmed",
            FulfillmentEvent::StockReleased { .. } => "StockReleased",
            FulfillmentEvent::ReservationExpired { .. } => RESERVATION_EXPIRED,
        }
    }

    pub fn order_id(&self) -> OrderId {
        match self {
            FulfillmentEvent::StockReserved { order_id, .. }
            | FulfillmentEvent::StockReservationFailed { order_id, .. }
            | FulfillmentEvent::StockConfirmed { order_id }
            | FulfillmentEvent::StockReleased { order_id, .. }
            | FulfillmentEvent::ReservationExpired { order_id, .. } => *order_id,
        }
    }

    /// Wraps the event for the inbound intake.
    pub fn into_inbound(self) -> Result<InboundEvent, SagaError> {
        let event_type = self.event_type();
        let order_id = self.order_id();
        let mut payload = serde_json::to_value(&self)?;
        if let Some(fields) = payload.as_object_mut() {
            fields.remove("type");
        }
        Ok(InboundEvent::new(event_type, order_id, payload))
    }
}

/// Envelope for an emitted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundEvent {
    pub event_id: EventId,
    /// Always the order the event belongs to.
    pub correlation_id: OrderId,
    pub emitted_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: FulfillmentEvent,
}

impl OutboundEvent {
    pub fn new(event: FulfillmentEvent, emitted_at: DateTime<Utc>) -> Self {
        Self {
            event_id: EventId::new(),
            correlation_id: event.order_id(),
            emitted_at,
            event,
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.event.event_type()
    }
}
