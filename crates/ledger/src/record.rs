use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Sku;

/// Version number of an inventory record, used for optimistic concurrency control.
///
/// A record is created at version 1 and every committed write bumps it by one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the version (0) of a record that does not exist yet.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the version (1) of a freshly registered record.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// Durable stock record for one SKU.
///
/// Availability is always derived from the two stored quantities and is
/// never persisted on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub sku: Sku,
    pub quantity_on_hand: i64,
    pub quantity_reserved: i64,
    pub version: Version,
    pub updated_at: DateTime<Utc>,
}

impl InventoryRecord {
    /// Creates a freshly registered record with nothing reserved.
    pub fn new(sku: Sku, quantity_on_hand: i64, now: DateTime<Utc>) -> Self {
        Self {
            sku,
            quantity_on_hand,
            quantity_reserved: 0,
            version: Version::first(),
            updated_at: now,
        }
    }

    /// Units that can still be reserved.
    pub fn quantity_available(&self) -> i64 {
        self.quantity_on_hand - self.quantity_reserved
    }

    /// Returns true if the quantities satisfy `0 <= reserved <= on_hand`.
    pub fn is_consistent(&self) -> bool {
        quantities_consistent(self.quantity_on_hand, self.quantity_reserved)
    }
}

/// Checks the ledger invariant for a pair of quantities.
pub(crate) fn quantities_consistent(on_hand: i64, reserved: i64) -> bool {
    on_hand >= 0 && reserved >= 0 && reserved <= on_hand
}
