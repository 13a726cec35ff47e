use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::record::quantities_consistent;
use crate::{
    InventoryRecord, LedgerError, OrderId, Reservation, ReservationId, ReservationStatus, Result,
    Sku, Version,
};

/// A version-conditioned overwrite of one inventory record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordUpdate {
    pub sku: Sku,
    /// The version the caller read; the write only lands if it is still current.
    pub expected_version: Version,
    pub quantity_on_hand: i64,
    pub quantity_reserved: i64,
}

impl RecordUpdate {
    /// Builds an update that replaces the quantities of a record read earlier.
    pub fn from_read(record: &InventoryRecord, quantity_on_hand: i64, quantity_reserved: i64) -> Self {
        Self {
            sku: record.sku.clone(),
            expected_version: record.version,
            quantity_on_hand,
            quantity_reserved,
        }
    }
}

/// The reservation side of a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationWrite {
    /// No reservation row is touched.
    None,
    /// Insert a brand new reservation.
    Insert(Reservation),
    /// Move a reservation from `from` to `to`; fails if it is no longer in `from`.
    Transition {
        reservation_id: ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
    },
}

/// A batch of writes applied atomically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerCommit {
    pub updates: Vec<RecordUpdate>,
    pub reservation: ReservationWrite,
    pub at: DateTime<Utc>,
}

impl LedgerCommit {
    /// Creates a commit touching only inventory records.
    pub fn records(updates: Vec<RecordUpdate>, at: DateTime<Utc>) -> Self {
        Self {
            updates,
            reservation: ReservationWrite::None,
            at,
        }
    }

    /// Creates a commit that also writes a reservation row.
    pub fn with_reservation(
        updates: Vec<RecordUpdate>,
        reservation: ReservationWrite,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            updates,
            reservation,
            at,
        }
    }
}

/// Position of the expiry scan: the last reservation handed out.
///
/// Due reservations are ordered by `(expires_at, reservation_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueCursor {
    pub expires_at: DateTime<Utc>,
    pub reservation_id: ReservationId,
}

impl From<&Reservation> for DueCursor {
    fn from(reservation: &Reservation) -> Self {
        Self {
            expires_at: reservation.expires_at,
            reservation_id: reservation.reservation_id,
        }
    }
}

/// Durable transactional store behind the inventory ledger.
///
/// Implementations must apply [`LedgerCommit`]s atomically and must reject
/// any commit whose record versions or reservation status no longer match.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Reads the latest committed record for a SKU.
    async fn get_record(&self, sku: &Sku) -> Result<Option<InventoryRecord>>;

    /// Reads the latest committed records for several SKUs.
    ///
    /// Missing SKUs are omitted from the result.
    async fn get_records(&self, skus: &[Sku]) -> Result<Vec<InventoryRecord>> {
        let mut records = Vec::with_capacity(skus.len());
        for sku in skus {
            if let Some(record) = self.get_record(sku).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Creates the record for a newly registered SKU.
    ///
    /// Fails with `RecordExists` if the SKU is already registered.
    async fn insert_record(&self, record: InventoryRecord) -> Result<()>;

    /// Loads a reservation by ID.
    async fn get_reservation(&self, reservation_id: ReservationId) -> Result<Option<Reservation>>;

    /// Loads the most recent reservation for an order.
    async fn find_reservation_by_order(&self, order_id: OrderId) -> Result<Option<Reservation>>;

    /// Lists pending reservations with `expires_at <= now`, strictly after `after`.
    async fn due_reservations(
        &self,
        now: DateTime<Utc>,
        after: Option<DueCursor>,
        limit: usize,
    ) -> Result<Vec<Reservation>>;

    /// Applies a batch of conditional writes atomically.
    async fn commit(&self, commit: LedgerCommit) -> Result<()>;
}

/// Rejects commits that could never be valid regardless of stored state.
pub fn validate_commit(commit: &LedgerCommit) -> Result<()> {
    for (index, update) in commit.updates.iter().enumerate() {
        if !quantities_consistent(update.quantity_on_hand, update.quantity_reserved) {
            return Err(LedgerError::InvariantViolation {
                sku: update.sku.clone(),
                on_hand: update.quantity_on_hand,
                reserved: update.quantity_reserved,
            });
        }

        // A SKU may appear at most once per commit
        if commit.updates[..index].iter().any(|u| u.sku == update.sku) {
            return Err(LedgerError::VersionConflict {
                sku: update.sku.clone(),
                expected: update.expected_version,
                actual: update.expected_version,
            });
        }
    }
    Ok(())
}

/// Orders due reservations the way every store pages through them.
pub(crate) fn due_order(a: &Reservation, b: &Reservation) -> std::cmp::Ordering {
    a.expires_at
        .cmp(&b.expires_at)
        .then(a.reservation_id.cmp(&b.reservation_id))
}

/// Returns true if the reservation sorts strictly after the cursor.
pub(crate) fn after_cursor(reservation: &Reservation, cursor: Option<DueCursor>) -> bool {
    match cursor {
        None => true,
        Some(c) => {
            (reservation.expires_at, reservation.reservation_id) > (c.expires_at, c.reservation_id)
        }
    }
}
