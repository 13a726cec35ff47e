//! Reserve, confirm, release, and expire against the ledger.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{Clock, OrderId, ReservationId, Sku, SystemClock};
use ledger::{
    DueCursor, InventoryRecord, LedgerCommit, LedgerError, LedgerStore, LineItem, RecordUpdate,
    Reservation, ReservationStatus, ReservationWrite,
};

use crate::config::ReservationConfig;
use crate::error::{InventoryError, Result};

/// Which terminal status a Pending reservation is being moved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Confirm,
    Release,
    Expire,
}

impl Settlement {
    fn target(self) -> ReservationStatus {
        match self {
            Settlement::Confirm => ReservationStatus::Confirmed,
            Settlement::Release => ReservationStatus::Released,
            Settlement::Expire => ReservationStatus::Expired,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Settlement::Confirm => "confirm",
            Settlement::Release => "release",
            Settlement::Expire => "expire",
        }
    }
}

/// What a settlement attempt found.
enum Settled {
    /// The transition was committed by this call.
    Applied(Reservation),
    /// Nothing to do: the reservation already sits where the caller wanted it.
    Unchanged(Reservation),
}

/// Owner of every inventory record mutation.
///
/// Each operation reads the current records, computes new quantities, and
/// commits them conditioned on the versions it read. A conflicting commit
/// is re-read and retried up to [`ReservationConfig::max_cas_attempts`]
/// times before failing with [`InventoryError::ConcurrencyExhausted`].
///
/// The ledger handed to the constructor is owned from then on: nothing
/// outside this crate gets its write half back.
#[derive(Clone)]
pub struct ReservationManager {
    ledger: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    config: ReservationConfig,
}

impl ReservationManager {
    /// Creates a manager on wall-clock time.
    pub fn new<L: LedgerStore + 'static>(ledger: Arc<L>, config: ReservationConfig) -> Self {
        Self::with_clock(ledger, Arc::new(SystemClock), config)
    }

    /// Creates a manager with an explicit time source.
    pub fn with_clock<L: LedgerStore + 'static>(
        ledger: Arc<L>,
        clock: Arc<dyn Clock>,
        config: ReservationConfig,
    ) -> Self {
        Self {
            ledger,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &ReservationConfig {
        &self.config
    }

    pub(crate) fn ledger(&self) -> &dyn LedgerStore {
        self.ledger.as_ref()
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn max_attempts(&self) -> u32 {
        self.config.max_cas_attempts
    }

    /// Returns `on_hand - reserved` as of the latest committed version.
    #[tracing::instrument(skip(self))]
    pub async fn get_availability(&self, sku: &Sku) -> Result<i64> {
        Ok(self.get_record(sku).await?.quantity_available())
    }

    /// Returns the full record for a SKU.
    pub async fn get_record(&self, sku: &Sku) -> Result<InventoryRecord> {
        self.ledger
            .get_record(sku)
            .await?
            .ok_or_else(|| InventoryError::UnknownSku(sku.clone()))
    }

    /// Holds stock for every line item of an order, or for none of them.
    ///
    /// Line items naming the same SKU are summed before the availability
    /// check. The created reservation is Pending and expires after the
    /// configured TTL.
    #[tracing::instrument(skip(self, items), fields(lines = items.len()))]
    pub async fn reserve(&self, order_id: OrderId, items: Vec<LineItem>) -> Result<Reservation> {
        let items = aggregate_line_items(items)?;
        let skus: Vec<Sku> = items.iter().map(|item| item.sku.clone()).collect();

        for attempt in 1..=self.max_attempts() {
            let records = self.load_records(&skus).await?;

            let mut updates = Vec::with_capacity(items.len());
            for item in &items {
                let record = &records[&item.sku];
                let available = record.quantity_available();
                if available < item.quantity {
                    metrics::counter!("inventory_reservations_total", "outcome" => "insufficient_stock")
                        .increment(1);
                    tracing::warn!(
                        sku = %item.sku,
                        requested = item.quantity,
                        available,
                        "insufficient stock"
                    );
                    return Err(InventoryError::InsufficientStock {
                        sku: item.sku.clone(),
                        requested: item.quantity,
                        available,
                    });
                }
                updates.push(RecordUpdate::from_read(
                    record,
                    record.quantity_on_hand,
                    record.quantity_reserved + item.quantity,
                ));
            }

            let now = self.now();
            let reservation = Reservation::pending(
                order_id,
                items.clone(),
                now,
                now + self.config.ttl_chrono(),
            );
            let commit = LedgerCommit::with_reservation(
                updates,
                ReservationWrite::Insert(reservation.clone()),
                now,
            );

            match self.ledger.commit(commit).await {
                Ok(()) => {
                    metrics::counter!("inventory_reservations_total", "outcome" => "reserved")
                        .increment(1);
                    tracing::info!(
                        reservation_id = %reservation.reservation_id,
                        expires_at = %reservation.expires_at,
                        "stock reserved"
                    );
                    return Ok(reservation);
                }
                Err(err) if err.is_conflict() => self.record_conflict("reserve", attempt, &err).await,
                Err(err) => return Err(err.into()),
            }
        }

        Err(self.exhausted("reserve"))
    }

    /// Turns a Pending reservation into a sale: on-hand and reserved both drop.
    ///
    /// Confirming an already Confirmed reservation is a no-op. A Released or
    /// Expired reservation can no longer be confirmed.
    #[tracing::instrument(skip(self))]
    pub async fn confirm(&self, reservation_id: ReservationId) -> Result<Reservation> {
        match self.settle(reservation_id, Settlement::Confirm).await? {
            Settled::Applied(r) | Settled::Unchanged(r) => Ok(r),
        }
    }

    /// Hands a Pending reservation's stock back to availability.
    ///
    /// Releasing a Released or Expired reservation is a no-op. A Confirmed
    /// reservation can no longer be released.
    #[tracing::instrument(skip(self))]
    pub async fn release(&self, reservation_id: ReservationId) -> Result<Reservation> {
        match self.settle(reservation_id, Settlement::Release).await? {
            Settled::Applied(r) | Settled::Unchanged(r) => Ok(r),
        }
    }

    /// Expires a Pending reservation whose TTL has elapsed.
    ///
    /// Returns true only if this call performed the expiry. A reservation
    /// that is not yet due, or that has already left Pending, yields false.
    #[tracing::instrument(skip(self))]
    pub async fn expire_if_due(&self, reservation_id: ReservationId) -> Result<bool> {
        match self.settle(reservation_id, Settlement::Expire).await? {
            Settled::Applied(_) => Ok(true),
            Settled::Unchanged(_) => Ok(false),
        }
    }

    pub async fn get_reservation(&self, reservation_id: ReservationId) -> Result<Option<Reservation>> {
        Ok(self.ledger.get_reservation(reservation_id).await?)
    }

    /// Returns the most recent reservation made for an order.
    pub async fn find_by_order(&self, order_id: OrderId) -> Result<Option<Reservation>> {
        Ok(self.ledger.find_reservation_by_order(order_id).await?)
    }

    /// Lists Pending reservations already past their expiry, after `after`.
    pub async fn due_reservations(
        &self,
        after: Option<DueCursor>,
        limit: usize,
    ) -> Result<Vec<Reservation>> {
        Ok(self.ledger.due_reservations(self.now(), after, limit).await?)
    }

    async fn settle(&self, reservation_id: ReservationId, settlement: Settlement) -> Result<Settled> {
        let target = settlement.target();

        for attempt in 1..=self.max_attempts() {
            let reservation = self
                .ledger
                .get_reservation(reservation_id)
                .await?
                .ok_or(InventoryError::ReservationNotFound(reservation_id))?;

            match (settlement, reservation.status) {
                (_, ReservationStatus::Pending) => {}
                (Settlement::Confirm, ReservationStatus::Confirmed) => {
                    tracing::debug!("reservation already confirmed");
                    return Ok(Settled::Unchanged(reservation));
                }
                (Settlement::Release | Settlement::Expire, status) if status.is_released() => {
                    tracing::debug!(%status, "reservation already released");
                    return Ok(Settled::Unchanged(reservation));
                }
                (Settlement::Expire, _) => return Ok(Settled::Unchanged(reservation)),
                (_, status) => {
                    tracing::warn!(%status, action = settlement.as_str(), "reservation cannot move");
                    return Err(InventoryError::InvalidReservationState {
                        reservation_id,
                        status,
                    });
                }
            }

            let now = self.now();
            if settlement == Settlement::Expire && !reservation.is_due(now) {
                return Ok(Settled::Unchanged(reservation));
            }

            let skus: Vec<Sku> = reservation
                .line_items
                .iter()
                .map(|item| item.sku.clone())
                .collect();
            let records = self.load_records(&skus).await?;

            let updates = reservation
                .line_items
                .iter()
                .map(|item| {
                    let record = &records[&item.sku];
                    let on_hand = match settlement {
                        Settlement::Confirm => record.quantity_on_hand - item.quantity,
                        Settlement::Release | Settlement::Expire => record.quantity_on_hand,
                    };
                    RecordUpdate::from_read(record, on_hand, record.quantity_reserved - item.quantity)
                })
                .collect();

            let commit = LedgerCommit::with_reservation(
                updates,
                ReservationWrite::Transition {
                    reservation_id,
                    from: ReservationStatus::Pending,
                    to: target,
                },
                now,
            );

            match self.ledger.commit(commit).await {
                Ok(()) => {
                    metrics::counter!("inventory_settlements_total", "status" => target.as_str())
                        .increment(1);
                    tracing::info!(status = %target, "reservation settled");
                    let mut settled = reservation;
                    settled.status = target;
                    settled.updated_at = now;
                    return Ok(Settled::Applied(settled));
                }
                Err(err) if err.is_conflict() => {
                    self.record_conflict(settlement.as_str(), attempt, &err).await
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(self.exhausted(settlement.as_str()))
    }

    /// Reads the records for `skus`, failing on the first one that is not registered.
    pub(crate) async fn load_records(&self, skus: &[Sku]) -> Result<HashMap<Sku, InventoryRecord>> {
        let records: HashMap<Sku, InventoryRecord> = self
            .ledger
            .get_records(skus)
            .await?
            .into_iter()
            .map(|record| (record.sku.clone(), record))
            .collect();

        if let Some(missing) = skus.iter().find(|sku| !records.contains_key(*sku)) {
            return Err(InventoryError::UnknownSku(missing.clone()));
        }
        Ok(records)
    }

    pub(crate) async fn record_conflict(&self, operation: &'static str, attempt: u32, err: &LedgerError) {
        metrics::counter!("inventory_cas_conflicts_total", "operation" => operation).increment(1);
        tracing::debug!(operation, attempt, error = %err, "write conflict, re-reading");
        tokio::task::yield_now().await;
    }

    pub(crate) fn exhausted(&self, operation: &'static str) -> InventoryError {
        let attempts = self.max_attempts();
        tracing::warn!(operation, attempts, "write conflicts exhausted retries");
        InventoryError::ConcurrencyExhausted { attempts }
    }
}

/// Validates quantities and folds repeated SKUs into one line, keeping first-seen order.
fn aggregate_line_items(items: Vec<LineItem>) -> Result<Vec<LineItem>> {
    if items.is_empty() {
        return Err(InventoryError::EmptyOrder);
    }

    let mut merged: Vec<LineItem> = Vec::with_capacity(items.len());
    for item in items {
        if item.quantity <= 0 {
            return Err(InventoryError::InvalidQuantity {
                sku: item.sku,
                quantity: item.quantity,
            });
        }
        match merged.iter_mut().find(|line| line.sku == item.sku) {
            Some(line) => {
                line.quantity = line.quantity.checked_add(item.quantity).ok_or(
                    InventoryError::InvalidQuantity {
                        sku: item.sku.clone(),
                        quantity: item.quantity,
                    },
                )?
            }
            None => merged.push(item),
        }
    }
    Ok(merged)
}
