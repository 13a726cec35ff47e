//! Holding area for events that keep failing.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::event::InboundEvent;

/// A failed event with the original payload and the last failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetter {
    pub event: InboundEvent,
    pub reason: String,
    /// Handler invocations made before giving up.
    pub attempts: u32,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Destination for dead letters.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn dead_letter(&self, letter: DeadLetter) -> Result<()>;
}

/// In-memory dead-letter queue.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDeadLetterQueue {
    letters: Arc<RwLock<Vec<DeadLetter>>>,
}

impl InMemoryDeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every dead letter, oldest first.
    pub async fn list(&self) -> Vec<DeadLetter> {
        self.letters.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.letters.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.letters.read().await.is_empty()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterQueue {
    async fn dead_letter(&self, letter: DeadLetter) -> Result<()> {
        self.letters.write().await.push(letter);
        Ok(())
    }
}
