use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{ConsumerError, Result};
use crate::event::InboundEvent;

/// Anything that accepts events into the inbound intake.
///
/// The HTTP adapter and the expiry sweeper both publish through this.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: InboundEvent) -> Result<()>;
}

/// Collects published events without delivering them.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventSink {
    events: Arc<RwLock<Vec<InboundEvent>>>,
    fail_next: Arc<RwLock<u32>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<InboundEvent> {
        self.events.read().await.clone()
    }

    /// Makes the next `count` publishes fail with `Closed`.
    pub async fn fail_next_publishes(&self, count: u32) {
        *self.fail_next.write().await = count;
    }

    /// Removes and returns everything published so far.
    pub async fn drain(&self) -> Vec<InboundEvent> {
        std::mem::take(&mut *self.events.write().await)
    }
}

#[async_trait]
impl EventSink for InMemoryEventSink {
    async fn publish(&self, event: InboundEvent) -> Result<()> {
        {
            let mut fail_next = self.fail_next.write().await;
            if *fail_next > 0 {
                *fail_next -= 1;
                return Err(ConsumerError::Closed);
            }
        }
        self.events.write().await.push(event);
        Ok(())
    }
}

#[async_trait]
impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    async fn publish(&self, event: InboundEvent) -> Result<()> {
        (**self).publish(event).await
    }
}
