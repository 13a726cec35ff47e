//! Periodic expiry of reservations past their TTL.

use std::sync::Arc;

use common::{OrderId, ReservationId};
use consumer::EventSink;
use inventory::{DueCursor, ReservationService};
use tokio::sync::{Mutex, watch};

use crate::config::SweeperConfig;
use crate::error::{Result, SagaError};
use crate::events::FulfillmentEvent;

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Due reservations looked at.
    pub scanned: usize,
    /// Reservations this sweep actually expired.
    pub expired: usize,
    /// Expired reservations still waiting for their event to be published.
    pub unannounced: usize,
}

#[derive(Debug, Default)]
struct SweepState {
    cursor: Option<DueCursor>,
    /// Expiries already committed whose `ReservationExpired` failed to publish.
    unannounced: Vec<(OrderId, ReservationId)>,
}

/// Expires due reservations and feeds `ReservationExpired` back into intake.
///
/// Each sweep reads one page of due reservations, resuming after the last
/// one seen, so a large backlog is worked through across ticks instead of
/// in a single pass. A short page means the backlog is drained and the next
/// sweep starts from the beginning again.
///
/// An expired reservation no longer shows up as due, so an event that fails
/// to publish is kept and retried at the start of every later sweep until
/// the intake takes it.
pub struct ExpirySweeper<R, E>
where
    R: ReservationService,
    E: EventSink,
{
    reservations: R,
    sink: E,
    config: SweeperConfig,
    state: Mutex<SweepState>,
}

impl<R, E> ExpirySweeper<R, E>
where
    R: ReservationService,
    E: EventSink,
{
    pub fn new(reservations: R, sink: E, config: SweeperConfig) -> Self {
        Self {
            reservations,
            sink,
            config,
            state: Mutex::new(SweepState::default()),
        }
    }

    /// Runs one sweep over a page of due reservations.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let mut state = self.state.lock().await;

        for (order_id, reservation_id) in std::mem::take(&mut state.unannounced) {
            if let Err(err) = self.announce(order_id, reservation_id).await {
                tracing::warn!(%order_id, %reservation_id, error = %err, "expiry still unannounced");
                state.unannounced.push((order_id, reservation_id));
            }
        }

        let page = self
            .reservations
            .due_reservations(state.cursor, self.config.page_size)
            .await
            .map_err(|e| SagaError::Store(e.to_string()))?;

        let mut report = SweepReport {
            scanned: page.len(),
            ..SweepReport::default()
        };

        for reservation in &page {
            let expired = match self.reservations.expire_if_due(reservation.reservation_id).await {
                Ok(expired) => expired,
                Err(err) => {
                    // Still Pending, so the next pass over the backlog retries it
                    tracing::warn!(
                        reservation_id = %reservation.reservation_id,
                        error = %err,
                        "failed to expire reservation"
                    );
                    continue;
                }
            };
            if !expired {
                continue;
            }
            report.expired += 1;

            if let Err(err) = self
                .announce(reservation.order_id, reservation.reservation_id)
                .await
            {
                tracing::warn!(
                    order_id = %reservation.order_id,
                    reservation_id = %reservation.reservation_id,
                    error = %err,
                    "expiry event not published, will retry"
                );
                state
                    .unannounced
                    .push((reservation.order_id, reservation.reservation_id));
            }
        }

        state.cursor = if page.len() < self.config.page_size {
            None
        } else {
            page.last().map(DueCursor::from)
        };
        report.unannounced = state.unannounced.len();
        metrics::gauge!("sweeper_unannounced_expiries").set(report.unannounced as f64);

        if report.scanned > 0 || report.unannounced > 0 {
            tracing::debug!(
                scanned = report.scanned,
                expired = report.expired,
                unannounced = report.unannounced,
                "sweep finished"
            );
        }
        Ok(report)
    }

    async fn announce(&self, order_id: OrderId, reservation_id: ReservationId) -> Result<()> {
        let event = FulfillmentEvent::ReservationExpired {
            order_id,
            reservation_id,
        }
        .into_inbound()?;
        self.sink
            .publish(event)
            .await
            .map_err(|e| SagaError::Publish(e.to_string()))?;

        metrics::counter!("sweeper_reservations_expired_total").increment(1);
        tracing::info!(%order_id, %reservation_id, "reservation expired");
        Ok(())
    }

    /// Sweeps on every tick of the configured interval until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval = ?self.config.interval, "expiry sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.sweep_once().await {
                        tracing::error!(error = %err, "expiry sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("expiry sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use common::{ManualClock, OrderId};
    use consumer::InMemoryEventSink;
    use inventory::{CatalogEvent, LineItem, ReservationConfig, ReservationManager};
    use ledger::InMemoryLedger;
    use std::time::Duration;

    async fn setup(page_size: usize) -> (
        Arc<ReservationManager>,
        ManualClock,
        InMemoryEventSink,
        ExpirySweeper<Arc<ReservationManager>, InMemoryEventSink>,
    ) {
        let clock = ManualClock::starting_now();
        let manager = Arc::new(ReservationManager::with_clock(
            Arc::new(InMemoryLedger::new()),
            Arc::new(clock.clone()),
            ReservationConfig::new(Duration::from_secs(60), 8),
        ));
        manager
            .apply_catalog_event(CatalogEvent::SkuRegistered {
                sku: "A".into(),
                quantity_on_hand: 100,
            })
            .await
            .unwrap();

        let sink = InMemoryEventSink::new();
        let sweeper = ExpirySweeper::new(
            manager.clone(),
            sink.clone(),
            SweeperConfig {
                interval: Duration::from_secs(60),
                page_size,
            },
        );
        (manager, clock, sink, sweeper)
    }

    #[tokio::test]
    async fn nothing_due_before_ttl() {
        let (manager, _clock, sink, sweeper) = setup(10).await;
        manager
            .reserve(OrderId::new(), vec![LineItem::new("A", 1)])
            .await
            .unwrap();

        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report, SweepReport::default());
        assert!(sink.events().await.is_empty());
    }

    #[tokio::test]
    async fn expires_due_reservations_and_publishes() {
        let (manager, clock, sink, sweeper) = setup(10).await;
        let order_id = OrderId::new();
        let reservation = manager
            .reserve(order_id, vec![LineItem::new("A", 4)])
            .await
            .unwrap();
        clock.advance(ChronoDuration::seconds(61));

        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(manager.get_availability(&"A".into()).await.unwrap(), 100);

        let events = sink.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "ReservationExpired");
        assert_eq!(events[0].correlation_id, order_id);
        assert_eq!(
            events[0].payload["reservation_id"],
            serde_json::json!(reservation.reservation_id)
        );

        // A second sweep finds nothing left to do.
        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.expired, 0);
        assert_eq!(sink.events().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_publish_is_retried_on_next_sweep() {
        let (manager, clock, sink, sweeper) = setup(10).await;
        let first = OrderId::new();
        let second = OrderId::new();
        for order_id in [first, second] {
            manager
                .reserve(order_id, vec![LineItem::new("A", 3)])
                .await
                .unwrap();
        }
        clock.advance(ChronoDuration::seconds(61));
        sink.fail_next_publishes(1).await;

        // One publish fails; the rest of the page is still handled.
        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.expired, 2);
        assert_eq!(report.unannounced, 1);
        assert_eq!(sink.events().await.len(), 1);
        assert_eq!(manager.get_availability(&"A".into()).await.unwrap(), 100);

        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.scanned, 0);
        assert_eq!(report.unannounced, 0);

        let mut announced: Vec<OrderId> = sink
            .events()
            .await
            .iter()
            .map(|e| e.correlation_id)
            .collect();
        announced.sort();
        let mut expected = vec![first, second];
        expected.sort();
        assert_eq!(announced, expected);

        // Nothing is announced twice.
        sweeper.sweep_once().await.unwrap();
        assert_eq!(sink.events().await.len(), 2);
    }

    #[tokio::test]
    async fn backlog_is_worked_through_in_pages() {
        let (manager, clock, sink, sweeper) = setup(2).await;
        for _ in 0..5 {
            manager
                .reserve(OrderId::new(), vec![LineItem::new("A", 1)])
                .await
                .unwrap();
        }
        clock.advance(ChronoDuration::seconds(61));

        let mut expired = 0;
        for _ in 0..3 {
            let report = sweeper.sweep_once().await.unwrap();
            assert!(report.scanned <= 2);
            expired += report.expired;
        }
        assert_eq!(expired, 5);
        assert_eq!(sink.events().await.len(), 5);
        assert_eq!(manager.get_availability(&"A".into()).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn confirmed_reservations_are_not_expired() {
        let (manager, clock, sink, sweeper) = setup(10).await;
        let reservation = manager
            .reserve(OrderId::new(), vec![LineItem::new("A", 2)])
            .await
            .unwrap();
        manager.confirm(reservation.reservation_id).await.unwrap();
        clock.advance(ChronoDuration::seconds(61));

        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.expired, 0);
        assert!(sink.events().await.is_empty());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (_manager, _clock, _sink, sweeper) = setup(10).await;
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::new(sweeper).run(rx));

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
