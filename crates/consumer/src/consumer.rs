//! Single-event processing: dedup, retry, dead-letter.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use crate::config::ConsumerConfig;
use crate::dead_letter::{DeadLetter, DeadLetterSink};
use crate::dedup::{DedupCache, ProcessedMarker, ProcessedMarkerStore};
use crate::event::InboundEvent;
use crate::handler::{EventHandler, HandlerError};

/// What happened to one delivery of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The handler acknowledged the event.
    Processed,
    /// The event had already been processed; nothing was done.
    Duplicate,
    /// The event came too early and should be offered again after `delay`.
    Requeue { delay: Duration },
    /// The event was moved to the dead-letter sink.
    DeadLettered,
}

impl Delivery {
    pub fn as_str(&self) -> &'static str {
        match self {
            Delivery::Processed => "processed",
            Delivery::Duplicate => "duplicate",
            Delivery::Requeue { .. } => "requeued",
            Delivery::DeadLettered => "dead_lettered",
        }
    }
}

/// Idempotent wrapper around an [`EventHandler`].
///
/// Callers must not process two events of the same order concurrently;
/// [`crate::PartitionedConsumer`] guarantees this.
pub struct EventConsumer<H: EventHandler> {
    handler: Arc<H>,
    cache: Mutex<DedupCache>,
    markers: Arc<dyn ProcessedMarkerStore>,
    dead_letters: Arc<dyn DeadLetterSink>,
    config: ConsumerConfig,
}

impl<H: EventHandler> EventConsumer<H> {
    pub fn new(
        handler: Arc<H>,
        markers: Arc<dyn ProcessedMarkerStore>,
        dead_letters: Arc<dyn DeadLetterSink>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            handler,
            cache: Mutex::new(DedupCache::new(config.dedup_capacity)),
            markers,
            dead_letters,
            config,
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Processes one delivery of an event.
    ///
    /// `requeues` is how many times this event has already been put back
    /// for arriving out of order.
    #[tracing::instrument(
        skip(self, event),
        fields(
            event_id = %event.event_id,
            event_type = %event.event_type,
            order_id = %event.correlation_id,
        )
    )]
    pub async fn process(&self, event: &InboundEvent, requeues: u32) -> Delivery {
        if self.is_duplicate(event).await {
            metrics::counter!("consumer_duplicates_total").increment(1);
            tracing::debug!("duplicate delivery acknowledged");
            return self.finish(event, Delivery::Duplicate);
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.handler.handle(event).await {
                Ok(()) => {
                    self.remember(event).await;
                    return self.finish(event, Delivery::Processed);
                }
                Err(HandlerError::OutOfOrder(reason)) => {
                    if requeues < self.config.max_requeues {
                        let delay = self.config.requeue.delay_for(requeues + 1);
                        metrics::counter!("consumer_requeues_total").increment(1);
                        tracing::info!(requeues, ?delay, %reason, "event arrived early, requeueing");
                        return self.finish(event, Delivery::Requeue { delay });
                    }
                    let reason = format!("still out of order after {requeues} requeues: {reason}");
                    return self.dead_letter(event, reason, requeues + attempt).await;
                }
                Err(HandlerError::Retryable(reason)) => {
                    if self.config.retry.should_retry(attempt) {
                        let delay = self.config.retry.delay_for(attempt);
                        metrics::counter!("consumer_retries_total").increment(1);
                        tracing::warn!(attempt, ?delay, %reason, "handler failed, retrying");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return self.dead_letter(event, reason, attempt).await;
                }
            }
        }
    }

    async fn is_duplicate(&self, event: &InboundEvent) -> bool {
        if self.lock_cache().contains(&event.event_id) {
            return true;
        }
        match self.markers.last_processed(event.correlation_id).await {
            Ok(marker) => marker.is_some_and(|m| m.event_id == event.event_id),
            Err(err) => {
                tracing::warn!(error = %err, "processed marker unavailable, relying on cache");
                false
            }
        }
    }

    async fn remember(&self, event: &InboundEvent) {
        self.lock_cache().insert(event.event_id);
        let marker = ProcessedMarker {
            event_id: event.event_id,
            event_type: event.event_type.clone(),
            processed_at: Utc::now(),
        };
        if let Err(err) = self.markers.mark_processed(event.correlation_id, marker).await {
            tracing::warn!(error = %err, "failed to persist processed marker");
        }
    }

    async fn dead_letter(&self, event: &InboundEvent, reason: String, attempts: u32) -> Delivery {
        metrics::counter!("consumer_dead_letters_total", "event_type" => event.event_type.clone())
            .increment(1);
        tracing::error!(attempts, %reason, payload = %event.payload, "event dead-lettered");

        let letter = DeadLetter {
            event: event.clone(),
            reason,
            attempts,
            dead_lettered_at: Utc::now(),
        };
        if let Err(err) = self.dead_letters.dead_letter(letter).await {
            tracing::error!(error = %err, event = ?event, "failed to store dead letter");
        }
        self.finish(event, Delivery::DeadLettered)
    }

    fn finish(&self, event: &InboundEvent, delivery: Delivery) -> Delivery {
        metrics::counter!(
            "consumer_events_processed_total",
            "event_type" => event.event_type.clone(),
            "outcome" => delivery.as_str()
        )
        .increment(1);
        delivery
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, DedupCache> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}
