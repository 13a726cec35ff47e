//! Inventory ledger for the fulfillment core.
//!
//! The ledger persists one [`InventoryRecord`] per SKU and the
//! [`Reservation`]s held against them. Every write goes through
//! [`LedgerStore::commit`], which applies a batch of version-conditioned
//! row updates atomically: either every compare-and-swap holds and the
//! whole batch lands, or nothing changes.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod reservation;
pub mod store;

pub use common::{OrderId, ReservationId, Sku};
pub use error::{LedgerError, Result};
pub use memory::InMemoryLedger;
pub use postgres::PostgresLedger;
pub use record::{InventoryRecord, Version};
pub use reservation::{LineItem, Reservation, ReservationStatus};
pub use store::{DueCursor, LedgerCommit, LedgerStore, RecordUpdate, ReservationWrite};
