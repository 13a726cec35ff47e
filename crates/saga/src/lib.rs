//! Order fulfillment saga.
//!
//! Each order runs through a saga keyed by its order ID:
//! 1. `OrderCreated` opens the saga and reserves stock
//! 2. `StockReserved` is announced and the saga waits for payment
//! 3. `PaymentSucceeded` confirms the reservation; `PaymentFailed` or
//!    `ReservationExpired` releases it
//!
//! The [`ExpirySweeper`] turns reservations that outlive their TTL into
//! `ReservationExpired` events on the same intake the coordinator reads.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod publisher;
pub mod state;
pub mod store;
pub mod sweeper;

pub use config::{CoordinatorConfig, SweeperConfig};
pub use coordinator::{Outcome, SagaCoordinator};
pub use error::{Result, SagaError};
pub use events::{FulfillmentEvent, OutboundEvent, SagaTrigger, TriggerKind};
pub use publisher::{EventPublisher, InMemoryEventPublisher};
pub use state::{AckReason, PendingStep, SagaStage, SagaState, StuckInfo};
pub use store::{InMemorySagaStore, SagaStore};
pub use sweeper::{ExpirySweeper, SweepReport};
