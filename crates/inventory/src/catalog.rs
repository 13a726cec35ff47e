//! Product catalog intake.
//!
//! The catalog stream is what creates inventory records and moves on-hand
//! stock; reservations only ever touch the reserved quantity until confirmed.

use common::Sku;
use ledger::{InventoryRecord, LedgerCommit, LedgerError, RecordUpdate};
use serde::{Deserialize, Serialize};

use crate::error::{InventoryError, Result};
use crate::manager::ReservationManager;

/// An event from the product catalog stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CatalogEvent {
    /// A SKU became sellable with an initial on-hand quantity.
    SkuRegistered { sku: Sku, quantity_on_hand: i64 },
    /// The on-hand quantity of a registered SKU was recounted or restocked.
    StockAdjusted { sku: Sku, quantity_on_hand: i64 },
}

impl CatalogEvent {
    pub fn sku(&self) -> &Sku {
        match self {
            CatalogEvent::SkuRegistered { sku, .. } | CatalogEvent::StockAdjusted { sku, .. } => sku,
        }
    }

    pub fn quantity_on_hand(&self) -> i64 {
        match self {
            CatalogEvent::SkuRegistered {
                quantity_on_hand, ..
            }
            | CatalogEvent::StockAdjusted {
                quantity_on_hand, ..
            } => *quantity_on_hand,
        }
    }
}

impl ReservationManager {
    /// Applies a catalog event and returns the resulting record.
    ///
    /// Registering an existing SKU with the same quantity is a no-op, which
    /// makes redelivered registrations harmless. An adjustment may never take
    /// on-hand below what is currently reserved.
    #[tracing::instrument(skip(self), fields(sku = %event.sku()))]
    pub async fn apply_catalog_event(&self, event: CatalogEvent) -> Result<InventoryRecord> {
        let sku = event.sku().clone();
        let on_hand = event.quantity_on_hand();
        if on_hand < 0 {
            return Err(InventoryError::InvalidQuantity {
                sku,
                quantity: on_hand,
            });
        }

        match event {
            CatalogEvent::SkuRegistered { .. } => self.register(sku, on_hand).await,
            CatalogEvent::StockAdjusted { .. } => self.adjust(sku, on_hand).await,
        }
    }

    async fn register(&self, sku: Sku, on_hand: i64) -> Result<InventoryRecord> {
        let record = InventoryRecord::new(sku.clone(), on_hand, self.now());
        match self.ledger().insert_record(record.clone()).await {
            Ok(()) => {
                tracing::info!(on_hand, "sku registered");
                Ok(record)
            }
            Err(LedgerError::RecordExists(_)) => {
                let existing = self.get_record(&sku).await?;
                if existing.quantity_on_hand == on_hand {
                    Ok(existing)
                } else {
                    Err(InventoryError::SkuAlreadyRegistered(sku))
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn adjust(&self, sku: Sku, on_hand: i64) -> Result<InventoryRecord> {
        for attempt in 1..=self.max_attempts() {
            let record = self.get_record(&sku).await?;
            if record.quantity_on_hand == on_hand {
                return Ok(record);
            }
            if on_hand < record.quantity_reserved {
                tracing::warn!(
                    on_hand,
                    reserved = record.quantity_reserved,
                    "stock adjustment below reserved quantity"
                );
                return Err(InventoryError::AdjustmentBelowReserved {
                    sku,
                    on_hand,
                    reserved: record.quantity_reserved,
                });
            }

            let now = self.now();
            let update = RecordUpdate::from_read(&record, on_hand, record.quantity_reserved);
            match self
                .ledger()
                .commit(LedgerCommit::records(vec![update], now))
                .await
            {
                Ok(()) => {
                    tracing::info!(from = record.quantity_on_hand, to = on_hand, "stock adjusted");
                    return Ok(InventoryRecord {
                        quantity_on_hand: on_hand,
                        version: record.version.next(),
                        updated_at: now,
                        ..record
                    });
                }
                Err(err) if err.is_conflict() => self.record_conflict("adjust", attempt, &err).await,
                Err(err) => return Err(err.into()),
            }
        }

        Err(self.exhausted("adjust"))
    }
}
