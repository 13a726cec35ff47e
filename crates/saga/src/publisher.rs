//! Outbound event publishing.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Result, SagaError};
use crate::events::OutboundEvent;

/// Where the coordinator sends the events it emits.
///
/// This is the boundary between the orchestrated inventory steps and the
/// choreographed payment hand-off.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: OutboundEvent) -> Result<()>;
}

#[derive(Debug, Default)]
struct PublisherState {
    events: Vec<OutboundEvent>,
    fail_on_publish: bool,
}

/// In-memory publisher that keeps every emitted event as an outbox view.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventPublisher {
    state: Arc<RwLock<PublisherState>>,
}

impl InMemoryEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every publish fail until turned off.
    pub async fn set_fail_on_publish(&self, fail: bool) {
        self.state.write().await.fail_on_publish = fail;
    }

    /// Returns every published event, oldest first.
    pub async fn events(&self) -> Vec<OutboundEvent> {
        self.state.read().await.events.clone()
    }

    /// Returns the types of every published event, oldest first.
    pub async fn event_types(&self) -> Vec<&'static str> {
        self.state
            .read()
            .await
            .events
            .iter()
            .map(OutboundEvent::event_type)
            .collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(&self, event: OutboundEvent) -> Result<()> {
        let mut state = self.state.write().await;
        if state.fail_on_publish {
            return Err(SagaError::Publish("channel unavailable".to_string()));
        }
        state.events.push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::FulfillmentEvent;
    use chrono::Utc;
    use common::OrderId;

    #[tokio::test]
    async fn records_events_in_order() {
        let publisher = InMemoryEventPublisher::new();
        let order_id = OrderId::new();

        publisher
            .publish(OutboundEvent::new(
                FulfillmentEvent::StockConfirmed { order_id },
                Utc::now(),
            ))
            .await
            .unwrap();

        assert_eq!(publisher.event_types().await, vec!["StockConfirmed"]);
    }

    #[tokio::test]
    async fn fail_on_publish() {
        let publisher = InMemoryEventPublisher::new();
        publisher.set_fail_on_publish(true).await;

        let result = publisher
            .publish(OutboundEvent::new(
                FulfillmentEvent::StockConfirmed {
                    order_id: OrderId::new(),
                },
                Utc::now(),
            ))
            .await;
        assert!(matches!(result, Err(SagaError::Publish(_))));
        assert!(publisher.events().await.is_empty());
    }
}
