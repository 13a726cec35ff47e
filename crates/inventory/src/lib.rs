//! Reservation Manager for the fulfillment core.
//!
//! Every mutation of an [`InventoryRecord`] goes through [`ReservationManager`]:
//! reserve, confirm, release, expiry, and catalog intake. Writes are
//! version-conditioned against the ledger and retried on conflict, so
//! same-SKU contention is serialized without locks.
//!
//! The ledger backends are re-exported for construction only. Once a ledger
//! is handed to [`ReservationManager::new`] its write path is reachable from
//! nowhere else, and the ledger trait itself is not re-exported:
//!
//! ```compile_fail
//! use inventory::LedgerStore;
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod manager;
pub mod service;

pub use catalog::CatalogEvent;
pub use config::ReservationConfig;
pub use error::{ErrorKind, InventoryError, Result};
pub use ledger::{
    DueCursor, InMemoryLedger, InventoryRecord, LineItem, PostgresLedger, Reservation,
    ReservationStatus, Version,
};
pub use manager::ReservationManager;
pub use service::ReservationService;
