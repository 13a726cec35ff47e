//! Process wiring shared by every handler.

use std::sync::Arc;

use consumer::{EventConsumer, InMemoryDeadLetterQueue, InMemoryMarkerStore, PartitionedConsumer};
use inventory::ReservationManager;
use saga::{ExpirySweeper, InMemoryEventPublisher, InMemorySagaStore, SagaCoordinator};

use crate::config::Config;

pub type Reservations = Arc<ReservationManager>;

pub type Coordinator = SagaCoordinator<InMemorySagaStore, Reservations, InMemoryEventPublisher>;

pub type Sweeper = ExpirySweeper<Reservations, Arc<PartitionedConsumer>>;

/// Shared application state accessible from all handlers.
///
/// Handlers reach the ledger only through the reservation manager.
pub struct AppState {
    pub reservations: Reservations,
    pub coordinator: Arc<Coordinator>,
    /// Partitioned intake the coordinator consumes from.
    pub intake: Arc<PartitionedConsumer>,
    pub sweeper: Arc<Sweeper>,
    pub dead_letters: Arc<InMemoryDeadLetterQueue>,
    /// Every event the coordinator has emitted.
    pub outbox: InMemoryEventPublisher,
}

/// Wires the coordinator, intake, and sweeper around a reservation manager.
///
/// Starts the partition workers, so it must run inside a Tokio runtime.
pub fn create_state(reservations: ReservationManager, config: &Config) -> Arc<AppState> {
    let reservations = Arc::new(reservations);
    let outbox = InMemoryEventPublisher::new();

    let coordinator = Arc::new(SagaCoordinator::new(
        InMemorySagaStore::new(),
        reservations.clone(),
        outbox.clone(),
        config.coordinator(),
    ));

    let dead_letters = Arc::new(InMemoryDeadLetterQueue::new());
    let consumer = Arc::new(EventConsumer::new(
        coordinator.clone(),
        Arc::new(InMemoryMarkerStore::with_capacity(config.marker_capacity)),
        dead_letters.clone(),
        config.consumer(),
    ));
    let intake = Arc::new(PartitionedConsumer::start(consumer));

    let sweeper = Arc::new(ExpirySweeper::new(
        reservations.clone(),
        intake.clone(),
        config.sweeper(),
    ));

    Arc::new(AppState {
        reservations,
        coordinator,
        intake,
        sweeper,
        dead_letters,
        outbox,
    })
}
