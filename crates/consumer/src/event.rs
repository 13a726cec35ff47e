use chrono::{DateTime, Utc};
use common::{EventId, OrderId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A message as it arrives from the channel.
///
/// `payload` is left undecoded; handlers parse it against their own
/// contracts so a malformed payload fails inside the retry loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub event_id: EventId,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Always the order the event belongs to.
    pub correlation_id: OrderId,
    #[serde(default)]
    pub payload: Value,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    /// Creates an event with a fresh ID, received now.
    pub fn new(event_type: impl Into<String>, correlation_id: OrderId, payload: Value) -> Self {
        Self {
            event_id: EventId::new(),
            event_type: event_type.into(),
            correlation_id,
            payload,
            received_at: Utc::now(),
        }
    }
}
