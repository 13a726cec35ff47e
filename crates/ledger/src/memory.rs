use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::store::{after_cursor, due_order, validate_commit};
use crate::{
    DueCursor, InventoryRecord, LedgerCommit, LedgerError, LedgerStore, OrderId, Reservation,
    ReservationId, ReservationWrite, Result, Sku,
};

/// Failure injection knobs for exercising retry paths.
#[derive(Debug, Default)]
struct Faults {
    /// Every operation fails while set.
    unavailable: bool,
    /// The next N operations fail, then the store recovers.
    fail_next: u32,
    /// The next N commits lose their compare-and-swap.
    conflict_next: u32,
}

#[derive(Debug, Default)]
struct LedgerState {
    records: HashMap<Sku, InventoryRecord>,
    reservations: HashMap<ReservationId, Reservation>,
    faults: Faults,
}

impl LedgerState {
    fn check_available(&mut self) -> Result<()> {
        if self.faults.unavailable {
            return Err(LedgerError::Unavailable("ledger is offline".to_string()));
        }
        if self.faults.fail_next > 0 {
            self.faults.fail_next -= 1;
            return Err(LedgerError::Unavailable(
                "transient ledger failure".to_string(),
            ));
        }
        Ok(())
    }
}

/// In-memory ledger implementation for testing and single-node runs.
///
/// A single lock guards all rows, which makes every commit trivially
/// atomic while still enforcing the same version checks as PostgreSQL.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryLedger {
    /// Creates a new empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation fail with `Unavailable` until cleared.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.faults.unavailable = unavailable;
    }

    /// Makes the next `count` operations fail with `Unavailable`.
    pub async fn fail_next_operations(&self, count: u32) {
        self.state.write().await.faults.fail_next = count;
    }

    /// Makes the next `count` commits fail with a version conflict.
    pub async fn conflict_next_commits(&self, count: u32) {
        self.state.write().await.faults.conflict_next = count;
    }

    /// Returns every stored record.
    pub async fn records(&self) -> Vec<InventoryRecord> {
        self.state.read().await.records.values().cloned().collect()
    }

    /// Returns the number of stored reservations.
    pub async fn reservation_count(&self) -> usize {
        self.state.read().await.reservations.len()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn get_record(&self, sku: &Sku) -> Result<Option<InventoryRecord>> {
        let mut state = self.state.write().await;
        state.check_available()?;
        Ok(state.records.get(sku).cloned())
    }

    async fn insert_record(&self, record: InventoryRecord) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_available()?;

        if !record.is_consistent() {
            return Err(LedgerError::InvariantViolation {
                sku: record.sku,
                on_hand: record.quantity_on_hand,
                reserved: record.quantity_reserved,
            });
        }
        if state.records.contains_key(&record.sku) {
            return Err(LedgerError::RecordExists(record.sku));
        }

        state.records.insert(record.sku.clone(), record);
        Ok(())
    }

    async fn get_reservation(&self, reservation_id: ReservationId) -> Result<Option<Reservation>> {
        let mut state = self.state.write().await;
        state.check_available()?;
        Ok(state.reservations.get(&reservation_id).cloned())
    }

    async fn find_reservation_by_order(&self, order_id: OrderId) -> Result<Option<Reservation>> {
        let mut state = self.state.write().await;
        state.check_available()?;
        Ok(state
            .reservations
            .values()
            .filter(|r| r.order_id == order_id)
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn due_reservations(
        &self,
        now: DateTime<Utc>,
        after: Option<DueCursor>,
        limit: usize,
    ) -> Result<Vec<Reservation>> {
        let mut state = self.state.write().await;
        state.check_available()?;

        let mut due: Vec<_> = state
            .reservations
            .values()
            .filter(|r| r.is_due(now) && after_cursor(r, after))
            .cloned()
            .collect();
        due.sort_by(due_order);
        due.truncate(limit);
        Ok(due)
    }

    async fn commit(&self, commit: LedgerCommit) -> Result<()> {
        validate_commit(&commit)?;

        let mut state = self.state.write().await;
        state.check_available()?;

        // Check every condition before touching anything
        for update in &commit.updates {
            let actual = state
                .records
                .get(&update.sku)
                .map(|r| r.version)
                .ok_or_else(|| LedgerError::RecordNotFound(update.sku.clone()))?;

            if state.faults.conflict_next > 0 || actual != update.expected_version {
                state.faults.conflict_next = state.faults.conflict_next.saturating_sub(1);
                return Err(LedgerError::VersionConflict {
                    sku: update.sku.clone(),
                    expected: update.expected_version,
                    actual,
                });
            }
        }

        match &commit.reservation {
            ReservationWrite::None => {}
            ReservationWrite::Insert(reservation) => {
                if state.reservations.contains_key(&reservation.reservation_id) {
                    return Err(LedgerError::ReservationExists(reservation.reservation_id));
                }
            }
            ReservationWrite::Transition {
                reservation_id,
                from,
                ..
            } => {
                let current = state
                    .reservations
                    .get(reservation_id)
                    .ok_or(LedgerError::ReservationNotFound(*reservation_id))?;
                if current.status != *from {
                    return Err(LedgerError::ReservationConflict {
                        reservation_id: *reservation_id,
                        expected: *from,
                        actual: current.status,
                    });
                }
            }
        }

        // Apply
        for update in commit.updates {
            if let Some(record) = state.records.get_mut(&update.sku) {
                record.quantity_on_hand = update.quantity_on_hand;
                record.quantity_reserved = update.quantity_reserved;
                record.version = record.version.next();
                record.updated_at = commit.at;
            }
        }

        match commit.reservation {
            ReservationWrite::None => {}
            ReservationWrite::Insert(reservation) => {
                state
                    .reservations
                    .insert(reservation.reservation_id, reservation);
            }
            ReservationWrite::Transition {
                reservation_id, to, ..
            } => {
                if let Some(reservation) = state.reservations.get_mut(&reservation_id) {
                    reservation.status = to;
                    reservation.updated_at = commit.at;
                }
            }
        }

        Ok(())
    }
}
