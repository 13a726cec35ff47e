//! Integration tests for the order fulfillment saga.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use common::{ManualClock, OrderId, RetryPolicy};
use consumer::{
    ConsumerConfig, EventConsumer, EventSink, InMemoryDeadLetterQueue, InMemoryEventSink,
    InMemoryMarkerStore, InboundEvent, PartitionedConsumer,
};
use inventory::{CatalogEvent, ReservationConfig, ReservationManager};
use ledger::InMemoryLedger;
use saga::{
    AckReason, CoordinatorConfig, ExpirySweeper, FulfillmentEvent, InMemoryEventPublisher,
    InMemorySagaStore, Outcome, PendingStep, SagaCoordinator, SagaError, SagaStage, SagaState,
    SweeperConfig,
};
use serde_json::json;

type Manager = Arc<ReservationManager>;
type TestCoordinator = SagaCoordinator<InMemorySagaStore, Manager, InMemoryEventPublisher>;

const TTL_SECS: u64 = 900;

struct TestHarness {
    coordinator: Arc<TestCoordinator>,
    manager: Manager,
    ledger: Arc<InMemoryLedger>,
    publisher: InMemoryEventPublisher,
    clock: ManualClock,
}

impl TestHarness {
    async fn new() -> Self {
        let clock = ManualClock::starting_now();
        let ledger = Arc::new(InMemoryLedger::new());
        let manager = Arc::new(ReservationManager::with_clock(
            ledger.clone(),
            Arc::new(clock.clone()),
            ReservationConfig::new(Duration::from_secs(TTL_SECS), 8),
        ));
        let publisher = InMemoryEventPublisher::new();

        let coordinator = Arc::new(SagaCoordinator::with_clock(
            InMemorySagaStore::new(),
            manager.clone(),
            publisher.clone(),
            Arc::new(clock.clone()),
            CoordinatorConfig {
                call_timeout: Duration::from_secs(1),
                retry: RetryPolicy::immediate(3),
            },
        ));

        let h = Self {
            coordinator,
            manager,
            ledger,
            publisher,
            clock,
        };
        h.register("SKU-001", 10).await;
        h.register("SKU-002", 5).await;
        h
    }

    async fn register(&self, sku: &str, quantity: i64) {
        self.manager
            .apply_catalog_event(CatalogEvent::SkuRegistered {
                sku: sku.into(),
                quantity_on_hand: quantity,
            })
            .await
            .unwrap();
    }

    async fn available(&self, sku: &str) -> i64 {
        self.manager.get_availability(&sku.into()).await.unwrap()
    }

    async fn saga(&self, order_id: OrderId) -> SagaState {
        self.coordinator.get_saga(order_id).await.unwrap().unwrap()
    }

    async fn handle(&self, event: &InboundEvent) -> Outcome {
        self.coordinator.handle_event(event).await.unwrap()
    }

    fn sweeper(&self, sink: InMemoryEventSink) -> ExpirySweeper<Manager, InMemoryEventSink> {
        ExpirySweeper::new(self.manager.clone(), sink, SweeperConfig::default())
    }
}

fn order_created(order_id: OrderId, items: &[(&str, i64)]) -> InboundEvent {
    let items: Vec<_> = items
        .iter()
        .map(|(sku, qty)| json!({"sku": sku, "qty": qty}))
        .collect();
    InboundEvent::new(
        "OrderCreated",
        order_id,
        json!({"order_id": order_id, "items": items, "customer_id": "cust-1"}),
    )
}

fn payment_succeeded(order_id: OrderId) -> InboundEvent {
    InboundEvent::new("PaymentSucceeded", order_id, json!({"order_id": order_id}))
}

fn payment_failed(order_id: OrderId) -> InboundEvent {
    InboundEvent::new(
        "PaymentFailed",
        order_id,
        json!({"order_id": order_id, "reason": "card_declined"}),
    )
}

#[tokio::test]
async fn test_order_created_reserves_and_awaits_payment() {
    let h = TestHarness::new().await;
    let order_id = OrderId::new();

    let outcome = h.handle(&order_created(order_id, &[("SKU-001", 3)])).await;
    let Outcome::Advanced(saga) = outcome else {
        panic!("expected the saga to advance, got {outcome:?}");
    };
    assert_eq!(saga.stage, SagaStage::AwaitingPayment);
    assert!(saga.reservation_id.is_some());
    assert!(!saga.is_stuck());

    assert_eq!(h.available("SKU-001").await, 7);
    assert_eq!(h.publisher.event_types().await, vec!["StockReserved"]);

    let events = h.publisher.events().await;
    assert_eq!(events[0].correlation_id, order_id);
    assert_eq!(
        events[0].event,
        FulfillmentEvent::StockReserved {
            order_id,
            reservation_id: saga.reservation_id.unwrap(),
        }
    );
}

#[tokio::test]
async fn test_payment_succeeded_confirms_stock() {
    let h = TestHarness::new().await;
    let order_id = OrderId::new();

    h.handle(&order_created(order_id, &[("SKU-001", 3)])).await;
    h.handle(&payment_succeeded(order_id)).await;

    let saga = h.saga(order_id).await;
    assert_eq!(saga.stage, SagaStage::Settled);

    let record = h.manager.get_record(&"SKU-001".into()).await.unwrap();
    assert_eq!(record.quantity_on_hand, 7);
    assert_eq!(record.quantity_reserved, 0);
    assert_eq!(
        h.publisher.event_types().await,
        vec!["StockReserved", "StockConfirmed"]
    );
}

#[tokio::test]
async fn test_insufficient_stock_cancels_without_reservation() {
    let h = TestHarness::new().await;
    let order_id = OrderId::new();

    h.handle(&order_created(order_id, &[("SKU-001", 2), ("SKU-002", 6)]))
        .await;

    let saga = h.saga(order_id).await;
    assert_eq!(saga.stage, SagaStage::Cancelled);
    assert_eq!(saga.cancel_reason.as_deref(), Some("insufficient_stock"));
    assert!(saga.reservation_id.is_none());

    assert_eq!(h.available("SKU-001").await, 10);
    assert_eq!(h.available("SKU-002").await, 5);
    assert_eq!(h.ledger.reservation_count().await, 0);

    let events = h.publisher.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].event,
        FulfillmentEvent::StockReservationFailed {
            order_id,
            reason: "insufficient_stock".into(),
            sku: Some("SKU-002".into()),
        }
    );
}

#[tokio::test]
async fn test_unknown_sku_cancels() {
    let h = TestHarness::new().await;
    let order_id = OrderId::new();

    h.handle(&order_created(order_id, &[("SKU-404", 1)])).await;

    let saga = h.saga(order_id).await;
    assert_eq!(saga.stage, SagaStage::Cancelled);
    assert_eq!(saga.cancel_reason.as_deref(), Some("unknown_sku"));
}

#[tokio::test]
async fn test_payment_failed_releases_stock() {
    let h = TestHarness::new().await;
    let order_id = OrderId::new();

    h.handle(&order_created(order_id, &[("SKU-001", 4)])).await;
    assert_eq!(h.available("SKU-001").await, 6);

    h.handle(&payment_failed(order_id)).await;

    let saga = h.saga(order_id).await;
    assert_eq!(saga.stage, SagaStage::Cancelled);
    assert_eq!(saga.cancel_reason.as_deref(), Some("payment_failed"));
    assert_eq!(h.available("SKU-001").await, 10);

    let events = h.publisher.events().await;
    assert_eq!(
        events.last().map(|e| e.event.clone()),
        Some(FulfillmentEvent::StockReleased {
            order_id,
            reason: "payment_failed".into(),
        })
    );
}

#[tokio::test]
async fn test_expired_reservation_is_released_through_intake() {
    let h = TestHarness::new().await;
    let order_id = OrderId::new();
    let sink = InMemoryEventSink::new();
    let sweeper = h.sweeper(sink.clone());

    h.handle(&order_created(order_id, &[("SKU-001", 5)])).await;
    h.clock.advance(ChronoDuration::seconds(TTL_SECS as i64 + 1));

    let report = sweeper.sweep_once().await.unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(h.available("SKU-001").await, 10);

    for event in sink.drain().await {
        h.handle(&event).await;
    }

    let saga = h.saga(order_id).await;
    assert_eq!(saga.stage, SagaStage::Cancelled);
    assert_eq!(saga.cancel_reason.as_deref(), Some("reservation_expired"));
    assert_eq!(
        h.publisher.event_types().await,
        vec!["StockReserved", "StockReleased"]
    );
}

#[tokio::test]
async fn test_payment_after_expiry_cancels_instead_of_confirming() {
    let h = TestHarness::new().await;
    let order_id = OrderId::new();
    let sink = InMemoryEventSink::new();

    h.handle(&order_created(order_id, &[("SKU-001", 5)])).await;
    h.clock.advance(ChronoDuration::seconds(TTL_SECS as i64 + 1));
    h.sweeper(sink.clone()).sweep_once().await.unwrap();

    // Payment lands before the expiry notification is consumed.
    h.handle(&payment_succeeded(order_id)).await;

    let saga = h.saga(order_id).await;
    assert_eq!(saga.stage, SagaStage::Cancelled);
    assert_eq!(saga.cancel_reason.as_deref(), Some("reservation_expired"));

    for event in sink.drain().await {
        assert_eq!(
            h.handle(&event).await,
            Outcome::Acknowledged(AckReason::Duplicate)
        );
    }

    let record = h.manager.get_record(&"SKU-001".into()).await.unwrap();
    assert_eq!(record.quantity_on_hand, 10);
    assert_eq!(record.quantity_reserved, 0);
}

#[tokio::test]
async fn test_expiry_racing_payment_failure_releases_once() {
    let h = TestHarness::new().await;
    let order_id = OrderId::new();
    let sink = InMemoryEventSink::new();

    h.handle(&order_created(order_id, &[("SKU-002", 5)])).await;
    h.clock.advance(ChronoDuration::seconds(TTL_SECS as i64 + 1));
    h.sweeper(sink.clone()).sweep_once().await.unwrap();

    h.handle(&payment_failed(order_id)).await;
    for event in sink.drain().await {
        h.handle(&event).await;
    }

    let saga = h.saga(order_id).await;
    assert_eq!(saga.stage, SagaStage::Cancelled);
    assert_eq!(saga.cancel_reason.as_deref(), Some("payment_failed"));
    assert_eq!(h.available("SKU-002").await, 5);

    let releases = h
        .publisher
        .event_types()
        .await
        .into_iter()
        .filter(|t| *t == "StockReleased")
        .count();
    assert_eq!(releases, 1);
}

#[tokio::test]
async fn test_duplicate_order_created_reserves_once() {
    let h = TestHarness::new().await;
    let order_id = OrderId::new();
    let event = order_created(order_id, &[("SKU-001", 2)]);

    h.handle(&event).await;
    // Same event redelivered, and a second OrderCreated with a new event ID.
    assert_eq!(
        h.handle(&event).await,
        Outcome::Acknowledged(AckReason::Duplicate)
    );
    assert_eq!(
        h.handle(&order_created(order_id, &[("SKU-001", 2)])).await,
        Outcome::Acknowledged(AckReason::Duplicate)
    );

    assert_eq!(h.ledger.reservation_count().await, 1);
    assert_eq!(h.available("SKU-001").await, 8);
    assert_eq!(h.publisher.event_types().await, vec!["StockReserved"]);
}

#[tokio::test]
async fn test_payment_before_order_is_out_of_order() {
    let h = TestHarness::new().await;
    let order_id = OrderId::new();

    let result = h.coordinator.handle_event(&payment_succeeded(order_id)).await;
    assert!(matches!(
        result,
        Err(SagaError::OutOfOrder { stage: None, .. })
    ));
    assert!(h.coordinator.get_saga(order_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_late_payment_is_acknowledged() {
    let h = TestHarness::new().await;
    let order_id = OrderId::new();

    h.handle(&order_created(order_id, &[("SKU-001", 1)])).await;
    h.handle(&payment_failed(order_id)).await;

    assert_eq!(
        h.handle(&payment_succeeded(order_id)).await,
        Outcome::Acknowledged(AckReason::LatePayment)
    );
    assert_eq!(h.saga(order_id).await.stage, SagaStage::Cancelled);
    assert_eq!(h.available("SKU-001").await, 10);
}

#[tokio::test]
async fn test_unrelated_events_are_ignored() {
    let h = TestHarness::new().await;
    let event = InboundEvent::new("ShipmentCreated", OrderId::new(), json!({}));
    assert_eq!(h.handle(&event).await, Outcome::Ignored);
}

#[tokio::test]
async fn test_transient_ledger_failure_is_retried() {
    let h = TestHarness::new().await;
    let order_id = OrderId::new();

    h.ledger.fail_next_operations(1).await;
    h.handle(&order_created(order_id, &[("SKU-001", 1)])).await;

    let saga = h.saga(order_id).await;
    assert_eq!(saga.stage, SagaStage::AwaitingPayment);
    assert!(!saga.is_stuck());
}

#[tokio::test]
async fn test_ledger_outage_marks_saga_stuck_until_resumed() {
    let h = TestHarness::new().await;
    let order_id = OrderId::new();

    h.ledger.set_unavailable(true).await;
    h.handle(&order_created(order_id, &[("SKU-001", 2)])).await;

    let saga = h.saga(order_id).await;
    assert_eq!(saga.stage, SagaStage::Started);
    let stuck = saga.stuck.clone().unwrap();
    assert!(matches!(stuck.step, PendingStep::Reserve { .. }));
    assert_eq!(stuck.reason, "unavailable");

    let listed = h.coordinator.list_stuck().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].order_id, order_id);

    // Events for a stuck saga wait.
    assert!(matches!(
        h.coordinator.handle_event(&payment_succeeded(order_id)).await,
        Err(SagaError::Stuck(_))
    ));

    h.ledger.set_unavailable(false).await;
    let resumed = h.coordinator.resume(order_id).await.unwrap();
    assert_eq!(resumed.stage, SagaStage::AwaitingPayment);
    assert!(!resumed.is_stuck());
    assert_eq!(h.available("SKU-001").await, 8);
    assert!(h.coordinator.list_stuck().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_resumes_reserve_once() {
    let h = TestHarness::new().await;
    let order_id = OrderId::new();

    h.ledger.set_unavailable(true).await;
    h.handle(&order_created(order_id, &[("SKU-001", 2)])).await;
    assert!(h.saga(order_id).await.is_stuck());
    h.ledger.set_unavailable(false).await;

    let (first, second) = tokio::join!(
        h.coordinator.resume(order_id),
        h.coordinator.resume(order_id)
    );
    let results = [first, second];

    let resumed: Vec<&SagaState> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(resumed.len(), 1);
    assert_eq!(resumed[0].stage, SagaStage::AwaitingPayment);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(SagaError::NotStuck(_) | SagaError::VersionConflict { .. })
    )));

    assert_eq!(h.ledger.reservation_count().await, 1);
    assert_eq!(h.available("SKU-001").await, 8);
}

#[tokio::test]
async fn test_publish_outage_marks_saga_stuck_until_resumed() {
    let h = TestHarness::new().await;
    let order_id = OrderId::new();

    h.publisher.set_fail_on_publish(true).await;
    h.handle(&order_created(order_id, &[("SKU-001", 2)])).await;

    let saga = h.saga(order_id).await;
    assert_eq!(saga.stage, SagaStage::StockReserved);
    assert_eq!(
        saga.stuck.map(|s| s.step),
        Some(PendingStep::AnnounceReservation)
    );
    // The hold stays in place while the saga waits.
    assert_eq!(h.available("SKU-001").await, 8);

    h.publisher.set_fail_on_publish(false).await;
    let resumed = h.coordinator.resume(order_id).await.unwrap();
    assert_eq!(resumed.stage, SagaStage::AwaitingPayment);
    assert_eq!(h.publisher.event_types().await, vec!["StockReserved"]);

    h.handle(&payment_succeeded(order_id)).await;
    assert_eq!(h.saga(order_id).await.stage, SagaStage::Settled);
}

#[tokio::test]
async fn test_resume_requires_stuck_saga() {
    let h = TestHarness::new().await;
    let order_id = OrderId::new();

    assert!(matches!(
        h.coordinator.resume(order_id).await,
        Err(SagaError::NotFound(_))
    ));

    h.handle(&order_created(order_id, &[("SKU-001", 1)])).await;
    assert!(matches!(
        h.coordinator.resume(order_id).await,
        Err(SagaError::NotStuck(_))
    ));
}

#[tokio::test]
async fn test_events_flow_through_partitioned_consumer() {
    let h = TestHarness::new().await;
    let dead_letters = Arc::new(InMemoryDeadLetterQueue::new());
    let consumer = Arc::new(EventConsumer::new(
        h.coordinator.clone(),
        Arc::new(InMemoryMarkerStore::new()),
        dead_letters.clone(),
        ConsumerConfig {
            partitions: 4,
            requeue: RetryPolicy::exponential(10, Duration::from_millis(20), Duration::from_millis(100)),
            ..ConsumerConfig::immediate(3, 10)
        },
    ));
    let intake = PartitionedConsumer::start(consumer);

    let orders: Vec<OrderId> = (0..4).map(|_| OrderId::new()).collect();
    for order_id in &orders {
        // Payment is published first and has to wait for the order.
        intake.publish(payment_succeeded(*order_id)).await.unwrap();
        intake
            .publish(order_created(*order_id, &[("SKU-001", 1)]))
            .await
            .unwrap();
    }
    intake.shutdown().await;

    for order_id in &orders {
        assert_eq!(h.saga(*order_id).await.stage, SagaStage::Settled);
    }
    assert!(dead_letters.is_empty().await);

    let record = h.manager.get_record(&"SKU-001".into()).await.unwrap();
    assert_eq!(record.quantity_on_hand, 6);
    assert_eq!(record.quantity_reserved, 0);
}
