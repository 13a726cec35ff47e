//! Per-order partition workers.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use common::OrderId;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::consumer::{Delivery, EventConsumer};
use crate::error::{ConsumerError, Result};
use crate::event::InboundEvent;
use crate::handler::EventHandler;
use crate::sink::EventSink;

struct Queued {
    event: InboundEvent,
    requeues: u32,
}

struct Delayed {
    due: Instant,
    queued: Queued,
}

/// Routes events to a fixed set of workers by `correlation_id`.
///
/// Each worker drains its own channel sequentially, so events of one order
/// are handled in the order they were published. Events that come back as
/// [`Delivery::Requeue`] are parked inside the worker and offered again once
/// their delay elapses, letting later events of the same order overtake them.
pub struct PartitionedConsumer {
    senders: Vec<mpsc::Sender<Queued>>,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl PartitionedConsumer {
    /// Spawns one worker per configured partition.
    pub fn start<H: EventHandler + 'static>(consumer: Arc<EventConsumer<H>>) -> Self {
        let partitions = consumer.config().partitions.max(1);
        let capacity = consumer.config().channel_capacity.max(1);
        let (shutdown, _) = watch::channel(false);

        let mut senders = Vec::with_capacity(partitions);
        let mut workers = Vec::with_capacity(partitions);
        for index in 0..partitions {
            let (tx, rx) = mpsc::channel(capacity);
            senders.push(tx);
            workers.push(tokio::spawn(run_partition(
                index,
                Arc::clone(&consumer),
                rx,
                shutdown.subscribe(),
            )));
        }

        tracing::info!(partitions, "event consumer started");
        Self {
            senders,
            shutdown,
            workers: Mutex::new(workers),
        }
    }

    pub fn partitions(&self) -> usize {
        self.senders.len()
    }

    /// The partition every event of `order_id` is routed to.
    pub fn partition_for(&self, order_id: &OrderId) -> usize {
        partition_index(order_id, self.senders.len())
    }

    /// Stops intake and waits for every worker to finish what it holds.
    ///
    /// Buffered and parked events are still processed; publishing after
    /// this returns [`ConsumerError::Closed`].
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let workers = std::mem::take(&mut *self.workers.lock().await);
        for worker in workers {
            if let Err(err) = worker.await {
                tracing::error!(error = %err, "partition worker panicked");
            }
        }
        tracing::info!("event consumer stopped");
    }
}

#[async_trait]
impl EventSink for PartitionedConsumer {
    async fn publish(&self, event: InboundEvent) -> Result<()> {
        let partition = self.partition_for(&event.correlation_id);
        self.senders[partition]
            .send(Queued { event, requeues: 0 })
            .await
            .map_err(|_| ConsumerError::Closed)
    }
}

fn partition_index(order_id: &OrderId, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    order_id.hash(&mut hasher);
    (hasher.finish() % partitions.max(1) as u64) as usize
}

async fn run_partition<H: EventHandler>(
    index: usize,
    consumer: Arc<EventConsumer<H>>,
    mut inbox: mpsc::Receiver<Queued>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut parked: Vec<Delayed> = Vec::new();
    let mut inbox_open = true;
    let mut closing = false;

    loop {
        if !inbox_open && parked.is_empty() {
            break;
        }
        let next_due = parked.iter().map(|d| d.due).min();

        tokio::select! {
            _ = shutdown.changed(), if !closing => {
                closing = true;
                inbox.close();
                tracing::debug!(partition = index, parked = parked.len(), "partition draining");
            }
            _ = tokio::time::sleep_until(next_due.unwrap_or_else(Instant::now)), if next_due.is_some() => {
                let now = Instant::now();
                let (mut due, waiting): (Vec<Delayed>, Vec<Delayed>) =
                    std::mem::take(&mut parked).into_iter().partition(|d| d.due <= now);
                parked = waiting;
                due.sort_by_key(|d| d.due);
                for delayed in due {
                    deliver(&consumer, delayed.queued, &mut parked).await;
                }
            }
            received = inbox.recv(), if inbox_open => match received {
                Some(queued) => deliver(&consumer, queued, &mut parked).await,
                None => inbox_open = false,
            },
            else => break,
        }
    }

    tracing::debug!(partition = index, "partition worker stopped");
}

async fn deliver<H: EventHandler>(
    consumer: &EventConsumer<H>,
    queued: Queued,
    parked: &mut Vec<Delayed>,
) {
    if let Delivery::Requeue { delay } = consumer.process(&queued.event, queued.requeues).await {
        parked.push(Delayed {
            due: Instant::now() + delay,
            queued: Queued {
                event: queued.event,
                requeues: queued.requeues + 1,
            },
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_is_stable_and_in_range() {
        let order_id = OrderId::new();
        let first = partition_index(&order_id, 8);
        assert!(first < 8);
        assert_eq!(partition_index(&order_id, 8), first);
        assert_eq!(partition_index(&order_id, 1), 0);
    }

    #[test]
    fn orders_spread_over_partitions() {
        let used: std::collections::HashSet<usize> = (0..200)
            .map(|_| partition_index(&OrderId::new(), 4))
            .collect();
        assert_eq!(used.len(), 4);
    }
}
