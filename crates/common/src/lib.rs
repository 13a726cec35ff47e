//! Shared types for the order fulfillment core.
//!
//! Every crate in the workspace speaks in these identifiers, reads time
//! through [`Clock`], and paces retries with [`RetryPolicy`].

pub mod clock;
pub mod retry;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use retry::RetryPolicy;
pub use types::{EventId, OrderId, ReservationId, Sku};
