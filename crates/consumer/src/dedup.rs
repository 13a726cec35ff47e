//! Duplicate detection.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{EventId, OrderId};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::Result;

/// Bounded set of recently processed event IDs.
///
/// Once full, the oldest ID is forgotten first.
#[derive(Debug)]
pub struct DedupCache {
    capacity: usize,
    seen: HashSet<EventId>,
    order: VecDeque<EventId>,
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    pub fn contains(&self, event_id: &EventId) -> bool {
        self.seen.contains(event_id)
    }

    /// Remembers an ID. Returns false if it was already present.
    pub fn insert(&mut self, event_id: EventId) -> bool {
        if !self.seen.insert(event_id) {
            return false;
        }
        self.order.push_back(event_id);
        if self.order.len() > self.capacity
            && let Some(evicted) = self.order.pop_front()
        {
            self.seen.remove(&evicted);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// The last event handled for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedMarker {
    pub event_id: EventId,
    pub event_type: String,
    pub processed_at: DateTime<Utc>,
}

/// Durable per-order record of the last processed event.
///
/// Survives what the in-process cache forgets: a restart or an eviction.
#[async_trait]
pub trait ProcessedMarkerStore: Send + Sync {
    async fn last_processed(&self, correlation_id: OrderId) -> Result<Option<ProcessedMarker>>;

    async fn mark_processed(&self, correlation_id: OrderId, marker: ProcessedMarker) -> Result<()>;
}

/// Orders tracked by [`InMemoryMarkerStore::new`].
pub const DEFAULT_MARKER_CAPACITY: usize = 100_000;

#[derive(Debug, Default)]
struct MarkerTable {
    markers: HashMap<OrderId, (u64, ProcessedMarker)>,
    /// Marking order; entries whose sequence is no longer current are stale.
    order: VecDeque<(OrderId, u64)>,
    next_seq: u64,
}

impl MarkerTable {
    fn is_current(&self, order_id: &OrderId, seq: u64) -> bool {
        self.markers.get(order_id).is_some_and(|(current, _)| *current == seq)
    }
}

/// In-memory marker store holding at most `capacity` orders.
///
/// The order marked least recently is forgotten first, which in practice
/// is a long-closed order. A redelivery for a forgotten order is still
/// caught by the saga's own last-event check.
#[derive(Debug, Clone)]
pub struct InMemoryMarkerStore {
    capacity: usize,
    table: Arc<RwLock<MarkerTable>>,
}

impl Default for InMemoryMarkerStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MARKER_CAPACITY)
    }
}

impl InMemoryMarkerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            table: Arc::new(RwLock::new(MarkerTable::default())),
        }
    }

    /// Number of orders currently tracked.
    pub async fn len(&self) -> usize {
        self.table.read().await.markers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.table.read().await.markers.is_empty()
    }
}

#[async_trait]
impl ProcessedMarkerStore for InMemoryMarkerStore {
    async fn last_processed(&self, correlation_id: OrderId) -> Result<Option<ProcessedMarker>> {
        Ok(self
            .table
            .read()
            .await
            .markers
            .get(&correlation_id)
            .map(|(_, marker)| marker.clone()))
    }

    async fn mark_processed(&self, correlation_id: OrderId, marker: ProcessedMarker) -> Result<()> {
        let mut table = self.table.write().await;
        let seq = table.next_seq;
        table.next_seq += 1;
        table.markers.insert(correlation_id, (seq, marker));
        table.order.push_back((correlation_id, seq));

        while table.markers.len() > self.capacity {
            let Some((order_id, seq)) = table.order.pop_front() else {
                break;
            };
            if table.is_current(&order_id, seq) {
                table.markers.remove(&order_id);
            }
        }

        // Re-marked orders leave stale entries behind
        if table.order.len() > self.capacity * 2 {
            let MarkerTable { markers, order, .. } = &mut *table;
            order.retain(|(order_id, seq)| {
                markers.get(order_id).is_some_and(|(current, _)| current == seq)
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remembers_inserted_ids() {
        let mut cache = DedupCache::new(4);
        let id = EventId::new();
        assert!(cache.insert(id));
        assert!(cache.contains(&id));
        assert!(!cache.insert(id));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut cache = DedupCache::new(2);
        let first = EventId::new();
        let second = EventId::new();
        let third = EventId::new();

        cache.insert(first);
        cache.insert(second);
        cache.insert(third);

        assert!(!cache.contains(&first));
        assert!(cache.contains(&second));
        assert!(cache.contains(&third));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn marker_store_keeps_latest_per_order() {
        let store = InMemoryMarkerStore::new();
        let order_id = OrderId::new();
        assert!(store.last_processed(order_id).await.unwrap().is_none());

        for event_type in ["OrderCreated", "PaymentSucceeded"] {
            store
                .mark_processed(
                    order_id,
                    ProcessedMarker {
                        event_id: EventId::new(),
                        event_type: event_type.into(),
                        processed_at: Utc::now(),
                    },
                )
                .await
                .unwrap();
        }

        let marker = store.last_processed(order_id).await.unwrap().unwrap();
        assert_eq!(marker.event_type, "PaymentSucceeded");
    }

    fn marker(event_type: &str) -> ProcessedMarker {
        ProcessedMarker {
            event_id: EventId::new(),
            event_type: event_type.into(),
            processed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn marker_store_forgets_least_recently_marked_orders() {
        let store = InMemoryMarkerStore::with_capacity(2);
        let first = OrderId::new();
        let second = OrderId::new();
        let third = OrderId::new();

        store.mark_processed(first, marker("OrderCreated")).await.unwrap();
        store.mark_processed(second, marker("OrderCreated")).await.unwrap();
        // Touching `first` again makes `second` the oldest
        store.mark_processed(first, marker("PaymentSucceeded")).await.unwrap();
        store.mark_processed(third, marker("OrderCreated")).await.unwrap();

        assert_eq!(store.len().await, 2);
        assert!(store.last_processed(first).await.unwrap().is_some());
        assert!(store.last_processed(second).await.unwrap().is_none());
        assert!(store.last_processed(third).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn marker_store_stays_bounded_under_churn() {
        let store = InMemoryMarkerStore::with_capacity(8);
        for _ in 0..1_000 {
            store
                .mark_processed(OrderId::new(), marker("OrderCreated"))
                .await
                .unwrap();
        }
        assert_eq!(store.len().await, 8);
        assert!(store.table.read().await.order.len() <= 16);
    }
}
