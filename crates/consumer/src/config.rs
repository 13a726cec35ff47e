use std::time::Duration;

use common::RetryPolicy;

/// Settings for the consumer and its partition workers.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Number of partition workers.
    pub partitions: usize,
    /// Backoff for handler failures; `max_attempts` is the delivery bound.
    pub retry: RetryPolicy,
    /// Backoff for events that arrived before the state they depend on.
    pub requeue: RetryPolicy,
    /// Times an out-of-order event is put back before it is dead-lettered.
    pub max_requeues: u32,
    /// Event IDs remembered by the in-process dedup cache.
    pub dedup_capacity: usize,
    /// Buffered events per partition.
    pub channel_capacity: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            partitions: 8,
            retry: RetryPolicy::exponential(5, Duration::from_millis(100), Duration::from_secs(5)),
            requeue: RetryPolicy::exponential(10, Duration::from_millis(200), Duration::from_secs(10)),
            max_requeues: 10,
            dedup_capacity: 10_000,
            channel_capacity: 1024,
        }
    }
}

impl ConsumerConfig {
    /// A configuration with no waiting between attempts.
    pub fn immediate(max_attempts: u32, max_requeues: u32) -> Self {
        Self {
            retry: RetryPolicy::immediate(max_attempts),
            requeue: RetryPolicy::immediate(max_requeues.max(1)),
            max_requeues,
            ..Self::default()
        }
    }
}
