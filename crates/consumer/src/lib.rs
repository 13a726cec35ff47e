//! Event Consumer Framework.
//!
//! Turns an at-least-once message channel into exactly-once delivery from
//! the handler's point of view:
//!
//! - [`EventConsumer`] deduplicates by `event_id` (bounded recent-id cache
//!   plus a per-correlation processed marker), retries failing handlers with
//!   backoff, and dead-letters what keeps failing.
//! - [`PartitionedConsumer`] runs one worker per partition, routing every
//!   event of an order to the same worker so an order's events are handled
//!   in publish order while different orders proceed concurrently.

pub mod config;
pub mod consumer;
pub mod dead_letter;
pub mod dedup;
pub mod error;
pub mod event;
pub mod handler;
pub mod partition;
pub mod sink;

pub use config::ConsumerConfig;
pub use consumer::{Delivery, EventConsumer};
pub use dead_letter::{DeadLetter, DeadLetterSink, InMemoryDeadLetterQueue};
pub use dedup::{
    DEFAULT_MARKER_CAPACITY, DedupCache, InMemoryMarkerStore, ProcessedMarker, ProcessedMarkerStore,
};
pub use error::{ConsumerError, Result};
pub use event::InboundEvent;
pub use handler::{EventHandler, HandlerError};
pub use partition::PartitionedConsumer;
pub use sink::{EventSink, InMemoryEventSink};
