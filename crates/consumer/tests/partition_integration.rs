//! Partitioned consumer behaviour end to end.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{OrderId, RetryPolicy};
use consumer::{
    ConsumerConfig, ConsumerError, EventConsumer, EventHandler, EventSink, HandlerError,
    InMemoryDeadLetterQueue, InMemoryMarkerStore, InboundEvent, PartitionedConsumer,
};
use serde_json::json;
use tokio::sync::Mutex;

/// Records handled events per order and refuses follow-ups that arrive
/// before the order was opened.
#[derive(Default)]
struct Recorder {
    handled: Mutex<HashMap<OrderId, Vec<String>>>,
    opened: Mutex<HashSet<OrderId>>,
}

impl Recorder {
    async fn handled(&self, order_id: OrderId) -> Vec<String> {
        self.handled
            .lock()
            .await
            .get(&order_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventHandler for Recorder {
    async fn handle(&self, event: &InboundEvent) -> Result<(), HandlerError> {
        let order_id = event.correlation_id;
        if event.event_type == "Open" {
            self.opened.lock().await.insert(order_id);
        } else if !self.opened.lock().await.contains(&order_id) {
            return Err(HandlerError::OutOfOrder(format!(
                "{} before Open",
                event.event_type
            )));
        }
        let label = event.payload["label"].as_str().unwrap_or(&event.event_type).to_string();
        self.handled
            .lock()
            .await
            .entry(order_id)
            .or_default()
            .push(label);
        Ok(())
    }
}

fn start(
    config: ConsumerConfig,
) -> (PartitionedConsumer, Arc<Recorder>, InMemoryDeadLetterQueue) {
    let recorder = Arc::new(Recorder::default());
    let dlq = InMemoryDeadLetterQueue::new();
    let consumer = EventConsumer::new(
        Arc::clone(&recorder),
        Arc::new(InMemoryMarkerStore::new()),
        Arc::new(dlq.clone()),
        config,
    );
    (PartitionedConsumer::start(Arc::new(consumer)), recorder, dlq)
}

fn step(order_id: OrderId, event_type: &str, label: &str) -> InboundEvent {
    InboundEvent::new(event_type, order_id, json!({ "label": label }))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn events_of_one_order_keep_publish_order() {
    let (consumer, recorder, dlq) = start(ConsumerConfig {
        partitions: 4,
        ..ConsumerConfig::immediate(3, 3)
    });

    let orders: Vec<OrderId> = (0..10).map(|_| OrderId::new()).collect();
    for order_id in &orders {
        consumer.publish(step(*order_id, "Open", "open")).await.unwrap();
    }
    for i in 0..20 {
        for order_id in &orders {
            consumer
                .publish(step(*order_id, "Step", &format!("step-{i}")))
                .await
                .unwrap();
        }
    }
    consumer.shutdown().await;

    let expected: Vec<String> = std::iter::once("open".to_string())
        .chain((0..20).map(|i| format!("step-{i}")))
        .collect();
    for order_id in orders {
        assert_eq!(recorder.handled(order_id).await, expected);
    }
    assert!(dlq.is_empty().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn redelivered_event_is_handled_once() {
    let (consumer, recorder, _) = start(ConsumerConfig::immediate(3, 3));
    let order_id = OrderId::new();
    let open = step(order_id, "Open", "open");

    consumer.publish(open.clone()).await.unwrap();
    consumer.publish(open.clone()).await.unwrap();
    consumer.publish(open).await.unwrap();
    consumer.shutdown().await;

    assert_eq!(recorder.handled(order_id).await, vec!["open".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn early_event_waits_for_its_predecessor() {
    let (consumer, recorder, dlq) = start(ConsumerConfig {
        requeue: RetryPolicy::exponential(5, Duration::from_millis(50), Duration::from_millis(200)),
        ..ConsumerConfig::immediate(3, 5)
    });
    let order_id = OrderId::new();

    consumer
        .publish(step(order_id, "Pay", "pay"))
        .await
        .unwrap();
    consumer
        .publish(step(order_id, "Open", "open"))
        .await
        .unwrap();
    consumer.shutdown().await;

    assert_eq!(
        recorder.handled(order_id).await,
        vec!["open".to_string(), "pay".to_string()]
    );
    assert!(dlq.is_empty().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn orphaned_event_is_dead_lettered_after_requeues() {
    let (consumer, recorder, dlq) = start(ConsumerConfig::immediate(3, 2));
    let order_id = OrderId::new();
    let orphan = step(order_id, "Pay", "pay");

    consumer.publish(orphan.clone()).await.unwrap();
    consumer.shutdown().await;

    assert!(recorder.handled(order_id).await.is_empty());
    let letters = dlq.list().await;
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].event, orphan);
    assert_eq!(letters[0].attempts, 3);
}

#[tokio::test]
async fn publishing_after_shutdown_is_refused() {
    let (consumer, _, _) = start(ConsumerConfig::immediate(1, 1));
    consumer.shutdown().await;

    let result = consumer.publish(step(OrderId::new(), "Open", "open")).await;
    assert_eq!(result, Err(ConsumerError::Closed));
}
