//! The reservation seam used by the saga coordinator and the sweeper.

use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, ReservationId};
use ledger::{DueCursor, LineItem, Reservation};

use crate::error::Result;
use crate::manager::ReservationManager;

/// Reservation operations, without any access to raw ledger writes.
#[async_trait]
pub trait ReservationService: Send + Sync {
    /// Reserves all line items for an order.
    async fn reserve(&self, order_id: OrderId, items: Vec<LineItem>) -> Result<Reservation>;

    /// Confirms a reservation; idempotent.
    async fn confirm(&self, reservation_id: ReservationId) -> Result<Reservation>;

    /// Releases a reservation; idempotent.
    async fn release(&self, reservation_id: ReservationId) -> Result<Reservation>;

    /// Expires a reservation if its TTL has elapsed.
    async fn expire_if_due(&self, reservation_id: ReservationId) -> Result<bool>;

    /// Loads a reservation by ID.
    async fn get_reservation(&self, reservation_id: ReservationId) -> Result<Option<Reservation>>;

    /// Lists reservations due for expiry.
    async fn due_reservations(
        &self,
        after: Option<DueCursor>,
        limit: usize,
    ) -> Result<Vec<Reservation>>;
}

#[async_trait]
impl ReservationService for ReservationManager {
    async fn reserve(&self, order_id: OrderId, items: Vec<LineItem>) -> Result<Reservation> {
        ReservationManager::reserve(self, order_id, items).await
    }

    async fn confirm(&self, reservation_id: ReservationId) -> Result<Reservation> {
        ReservationManager::confirm(self, reservation_id).await
    }

    async fn release(&self, reservation_id: ReservationId) -> Result<Reservation> {
        ReservationManager::release(self, reservation_id).await
    }

    async fn expire_if_due(&self, reservation_id: ReservationId) -> Result<bool> {
        ReservationManager::expire_if_due(self, reservation_id).await
    }

    async fn get_reservation(&self, reservation_id: ReservationId) -> Result<Option<Reservation>> {
        ReservationManager::get_reservation(self, reservation_id).await
    }

    async fn due_reservations(
        &self,
        after: Option<DueCursor>,
        limit: usize,
    ) -> Result<Vec<Reservation>> {
        ReservationManager::due_reservations(self, after, limit).await
    }
}

#[async_trait]
impl<T: ReservationService + ?Sized> ReservationService for Arc<T> {
    async fn reserve(&self, order_id: OrderId, items: Vec<LineItem>) -> Result<Reservation> {
        (**self).reserve(order_id, items).await
    }

    async fn confirm(&self, reservation_id: ReservationId) -> Result<Reservation> {
        (**self).confirm(reservation_id).await
    }

    async fn release(&self, reservation_id: ReservationId) -> Result<Reservation> {
        (**self).release(reservation_id).await
    }

    async fn expire_if_due(&self, reservation_id: ReservationId) -> Result<bool> {
        (**self).expire_if_due(reservation_id).await
    }

    async fn get_reservation(&self, reservation_id: ReservationId) -> Result<Option<Reservation>> {
        (**self).get_reservation(reservation_id).await
    }

    async fn due_reservations(
        &self,
        after: Option<DueCursor>,
        limit: usize,
    ) -> Result<Vec<Reservation>> {
        (**self).due_reservations(after, limit).await
    }
}
