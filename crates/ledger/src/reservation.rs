use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{OrderId, ReservationId, Sku};

/// One SKU and the quantity held for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub sku: Sku,
    #[serde(rename = "qty")]
    pub quantity: i64,
}

impl LineItem {
    pub fn new(sku: impl Into<Sku>, quantity: i64) -> Self {
        Self {
            sku: sku.into(),
            quantity,
        }
    }
}

/// Lifecycle of a reservation.
///
/// ```text
/// Pending ──┬──► Confirmed
///           ├──► Released
///           └──► Expired
/// ```
///
/// Every status other than `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Released,
    Expired,
}

impl ReservationStatus {
    /// Returns true if no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Pending)
    }

    /// Returns true if the reserved stock has been handed back to availability.
    pub fn is_released(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Released | ReservationStatus::Expired
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "Pending",
            ReservationStatus::Confirmed => "Confirmed",
            ReservationStatus::Released => "Released",
            ReservationStatus::Expired => "Expired",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(ReservationStatus::Pending),
            "Confirmed" => Ok(ReservationStatus::Confirmed),
            "Released" => Ok(ReservationStatus::Released),
            "Expired" => Ok(ReservationStatus::Expired),
            other => Err(format!("unknown reservation status: {other}")),
        }
    }
}

/// A provisional hold on stock for one order.
///
/// Only `status` and `updated_at` ever change after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub reservation_id: ReservationId,
    pub order_id: OrderId,
    pub line_items: Vec<LineItem>,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    /// Creates a new pending reservation.
    pub fn pending(
        order_id: OrderId,
        line_items: Vec<LineItem>,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            reservation_id: ReservationId::new(),
            order_id,
            line_items,
            status: ReservationStatus::Pending,
            created_at,
            expires_at,
            updated_at: created_at,
        }
    }

    /// Returns true if the reservation is pending and its TTL has elapsed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Pending && now >= self.expires_at
    }

    /// Total units held across all line items.
    pub fn total_quantity(&self) -> i64 {
        self.line_items.iter().map(|item| item.quantity).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(now: DateTime<Utc>) -> Reservation {
        Reservation::pending(
            OrderId::new(),
            vec![LineItem::new("SKU-1", 2), LineItem::new("SKU-2", 3)],
            now,
            now + Duration::minutes(15),
        )
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!ReservationStatus::Pending.is_terminal());
        assert!(ReservationStatus::Confirmed.is_terminal());
        assert!(ReservationStatus::Released.is_terminal());
        assert!(ReservationStatus::Expired.is_terminal());
    }

    #[test]
    fn released_and_expired_both_return_stock() {
        assert!(ReservationStatus::Released.is_released());
        assert!(ReservationStatus::Expired.is_released());
        assert!(!ReservationStatus::Confirmed.is_released());
    }

    #[test]
    fn is_due_at_exact_expiry() {
        let now = Utc::now();
        let reservation = sample(now);
        assert!(!reservation.is_due(now));
        assert!(reservation.is_due(reservation.expires_at));
    }

    #[test]
    fn terminal_reservation_is_never_due() {
        let now = Utc::now();
        let mut reservation = sample(now);
        reservation.status = ReservationStatus::Released;
        assert!(!reservation.is_due(now + Duration::days(1)));
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            ReservationStatus::Pending,
            ReservationStatus::Confirmed,
            ReservationStatus::Released,
            ReservationStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<ReservationStatus>(), Ok(status));
        }
        assert!("Cancelled".parse::<ReservationStatus>().is_err());
    }

    #[test]
    fn line_item_uses_qty_on_the_wire() {
        let json = serde_json::to_value(LineItem::new("SKU-9", 4)).unwrap();
        assert_eq!(json, serde_json::json!({"sku": "SKU-9", "qty": 4}));
    }

    #[test]
    fn total_quantity_sums_lines() {
        assert_eq!(sample(Utc::now()).total_quantity(), 5);
    }
}
