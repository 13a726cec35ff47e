//! Saga coordinator for the order fulfillment saga.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use common::{Clock, EventId, OrderId, Sku, SystemClock};
use consumer::{EventHandler, HandlerError, InboundEvent};
use inventory::{ErrorKind, InventoryError, LineItem, ReservationService, ReservationStatus};

use crate::config::CoordinatorConfig;
use crate::error::{Result, SagaError};
use crate::events::{FulfillmentEvent, OrderCreated, OutboundEvent, SagaTrigger};
use crate::publisher::EventPublisher;
use crate::state::{AckReason, Action, PendingStep, SagaStage, SagaState, StuckInfo, next_action};
use crate::store::SagaStore;

/// What handling an inbound event amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The saga moved; this is its state afterwards (possibly stuck).
    Advanced(SagaState),
    /// The event was acknowledged without side effects.
    Acknowledged(AckReason),
    /// The event type is not one the saga reacts to.
    Ignored,
}

/// How a failed collaborator call should be treated.
enum Failure {
    /// Retrying cannot help.
    Permanent,
    /// Retry with backoff; the string is a sanitized description.
    Transient(String),
}

enum StepError<E> {
    Rejected(E),
    Exhausted(String),
}

fn classify_inventory(err: &InventoryError) -> Failure {
    match err.kind() {
        ErrorKind::Business => Failure::Permanent,
        ErrorKind::Application | ErrorKind::Infrastructure => {
            Failure::Transient(err.reason_code().to_string())
        }
    }
}

/// Drives each order through reserve, payment, and confirm or release.
///
/// Inventory steps are orchestrated here through [`ReservationService`];
/// the payment hand-off is choreographed through the events this emits via
/// [`EventPublisher`] and the payment outcomes it receives.
///
/// Infrastructure failures are retried with backoff and jitter, each call
/// bounded by a timeout. When retries run out the saga is marked stuck with
/// the step to re-run, and waits for [`SagaCoordinator::resume`].
pub struct SagaCoordinator<S, R, P>
where
    S: SagaStore,
    R: ReservationService,
    P: EventPublisher,
{
    store: S,
    reservations: R,
    publisher: P,
    clock: Arc<dyn Clock>,
    config: CoordinatorConfig,
}

impl<S, R, P> SagaCoordinator<S, R, P>
where
    S: SagaStore,
    R: ReservationService,
    P: EventPublisher,
{
    /// Creates a new saga coordinator.
    pub fn new(store: S, reservations: R, publisher: P, config: CoordinatorConfig) -> Self {
        Self::with_clock(store, reservations, publisher, Arc::new(SystemClock), config)
    }

    /// Creates a coordinator with an explicit time source.
    pub fn with_clock(
        store: S,
        reservations: R,
        publisher: P,
        clock: Arc<dyn Clock>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            store,
            reservations,
            publisher,
            clock,
            config,
        }
    }

    /// Loads the saga for an order.
    pub async fn get_saga(&self, order_id: OrderId) -> Result<Option<SagaState>> {
        self.store.get(order_id).await
    }

    /// Lists sagas waiting for operator intervention.
    pub async fn list_stuck(&self) -> Result<Vec<SagaState>> {
        self.store.list_stuck().await
    }

    /// Applies one inbound event.
    ///
    /// Fails with [`SagaError::OutOfOrder`] when the saga is not ready for the
    /// event and with [`SagaError::Stuck`] while the saga awaits an operator.
    #[tracing::instrument(
        skip(self, event),
        fields(
            event_id = %event.event_id,
            event_type = %event.event_type,
            order_id = %event.correlation_id,
        )
    )]
    pub async fn handle_event(&self, event: &InboundEvent) -> Result<Outcome> {
        let Some(trigger) = SagaTrigger::parse(event)? else {
            tracing::debug!("event type not handled by the saga");
            return Ok(Outcome::Ignored);
        };
        let kind = trigger.kind();
        let saga = self.store.get(trigger.order_id()).await?;

        if let Some(saga) = &saga
            && saga.last_event_id == Some(event.event_id)
        {
            return Ok(self.acknowledge(saga.order_id, AckReason::Duplicate));
        }

        let action = next_action(saga.as_ref().map(|s| s.stage), kind);

        if let Some(saga) = &saga
            && saga.is_stuck()
            && !matches!(action, Action::Acknowledge(_))
        {
            return Err(SagaError::Stuck(saga.order_id));
        }

        match action {
            Action::Reserve => {
                let SagaTrigger::OrderCreated(created) = trigger else {
                    return Err(SagaError::MalformedEvent(format!("{kind} cannot open a saga")));
                };
                self.open(event.event_id, created).await
            }
            Action::Acknowledge(reason) => Ok(self.acknowledge(trigger.order_id(), reason)),
            Action::Defer => Err(SagaError::OutOfOrder {
                order_id: trigger.order_id(),
                stage: saga.map(|s| s.stage),
                event_type: kind.to_string(),
            }),
            Action::Confirm | Action::Compensate => {
                let Some(mut saga) = saga else {
                    return Err(SagaError::NotFound(trigger.order_id()));
                };

                if let SagaTrigger::ReservationExpired(expired) = &trigger
                    && saga.reservation_id != Some(expired.reservation_id)
                {
                    return Ok(self.acknowledge(saga.order_id, AckReason::Stale));
                }

                saga.last_event_id = Some(event.event_id);
                let next = match trigger {
                    SagaTrigger::PaymentSucceeded(_) => self.confirm_step(saga).await?,
                    SagaTrigger::PaymentFailed(_) => {
                        self.compensate_step(saga, "payment_failed".to_string()).await?
                    }
                    _ => {
                        self.compensate_step(saga, "reservation_expired".to_string())
                            .await?
                    }
                };
                Ok(Outcome::Advanced(next))
            }
        }
    }

    /// Re-runs the pending step of a stuck saga.
    ///
    /// The saga is claimed first by clearing its stuck marker under the
    /// version check, so of two concurrent resumes only one runs the step;
    /// the other fails with [`SagaError::NotStuck`] or
    /// [`SagaError::VersionConflict`] before touching inventory.
    #[tracing::instrument(skip(self))]
    pub async fn resume(&self, order_id: OrderId) -> Result<SagaState> {
        let mut saga = self
            .store
            .get(order_id)
            .await?
            .ok_or(SagaError::NotFound(order_id))?;
        let Some(stuck) = saga.stuck.take() else {
            return Err(SagaError::NotStuck(order_id));
        };
        saga.updated_at = self.clock.now();
        let saga = self.store.update(saga).await.inspect_err(|err| {
            tracing::warn!(error = %err, "saga claimed by another resume");
        })?;

        metrics::counter!("saga_resumed_total", "step" => stuck.step.name()).increment(1);
        tracing::info!(step = stuck.step.name(), stage = %saga.stage, "resuming stuck saga");

        match stuck.step {
            PendingStep::Reserve { items } => self.reserve_step(saga, items).await,
            PendingStep::AnnounceReservation => self.announce_reservation(saga).await,
            PendingStep::AnnounceRejection { reason, sku } => self.reject(saga, reason, sku).await,
            PendingStep::Confirm => self.confirm_step(saga).await,
            PendingStep::Release { reason } => self.compensate_step(saga, reason).await,
        }
    }

    async fn open(&self, event_id: EventId, created: OrderCreated) -> Result<Outcome> {
        let saga = SagaState::started(created.order_id, event_id, self.clock.now());
        match self.store.create(&saga).await {
            Ok(()) => {}
            Err(SagaError::AlreadyExists(order_id)) => {
                return Ok(self.acknowledge(order_id, AckReason::Duplicate));
            }
            Err(err) => return Err(err),
        }

        metrics::counter!("saga_started_total").increment(1);
        tracing::info!(lines = created.items.len(), "saga started");

        let next = self.reserve_step(saga, created.items).await?;
        Ok(Outcome::Advanced(next))
    }

    async fn reserve_step(&self, saga: SagaState, items: Vec<LineItem>) -> Result<SagaState> {
        let order_id = saga.order_id;
        let result = self
            .call(
                "reserve",
                || self.reservations.reserve(order_id, items.clone()),
                classify_inventory,
            )
            .await;

        match result {
            Ok(reservation) => {
                let mut saga = saga;
                saga.reservation_id = Some(reservation.reservation_id);
                let saga = self.transition(saga, SagaStage::StockReserved).await?;
                self.announce_reservation(saga).await
            }
            Err(StepError::Rejected(err)) => {
                tracing::warn!(reason = err.reason_code(), "reservation rejected");
                self.reject(saga, err.reason_code().to_string(), err.sku().cloned())
                    .await
            }
            Err(StepError::Exhausted(reason)) => {
                self.mark_stuck(saga, PendingStep::Reserve { items }, reason)
                    .await
            }
        }
    }

    async fn announce_reservation(&self, saga: SagaState) -> Result<SagaState> {
        let reservation_id = saga
            .reservation_id
            .ok_or_else(|| SagaError::Store(format!("saga {} has no reservation", saga.order_id)))?;

        let event = FulfillmentEvent::StockReserved {
            order_id: saga.order_id,
            reservation_id,
        };
        match self.emit(event).await {
            Ok(()) => self.transition(saga, SagaStage::AwaitingPayment).await,
            Err(reason) => {
                self.mark_stuck(saga, PendingStep::AnnounceReservation, reason)
                    .await
            }
        }
    }

    async fn reject(&self, saga: SagaState, reason: String, sku: Option<Sku>) -> Result<SagaState> {
        let event = FulfillmentEvent::StockReservationFailed {
            order_id: saga.order_id,
            reason: reason.clone(),
            sku: sku.clone(),
        };
        match self.emit(event).await {
            Ok(()) => {
                let mut saga = saga;
                saga.cancel_reason = Some(reason);
                self.transition(saga, SagaStage::Cancelled).await
            }
            Err(failure) => {
                self.mark_stuck(saga, PendingStep::AnnounceRejection { reason, sku }, failure)
                    .await
            }
        }
    }

    async fn confirm_step(&self, saga: SagaState) -> Result<SagaState> {
        let reservation_id = saga
            .reservation_id
            .ok_or_else(|| SagaError::Store(format!("saga {} has no reservation", saga.order_id)))?;

        let result = self
            .call(
                "confirm",
                || self.reservations.confirm(reservation_id),
                classify_inventory,
            )
            .await;

        match result {
            Ok(_) => match self
                .emit(FulfillmentEvent::StockConfirmed {
                    order_id: saga.order_id,
                })
                .await
            {
                Ok(()) => self.transition(saga, SagaStage::Settled).await,
                Err(reason) => self.mark_stuck(saga, PendingStep::Confirm, reason).await,
            },
            Err(StepError::Rejected(err)) => {
                // The hold is gone (expired or released) before payment landed
                let reason = match &err {
                    InventoryError::InvalidReservationState {
                        status: ReservationStatus::Expired,
                        ..
                    } => "reservation_expired".to_string(),
                    other => other.reason_code().to_string(),
                };
                tracing::warn!(%reason, "reservation could not be confirmed, cancelling");
                let saga = self.transition(saga, SagaStage::Compensating).await?;
                self.finish_cancel(saga, reason).await
            }
            Err(StepError::Exhausted(reason)) => {
                self.mark_stuck(saga, PendingStep::Confirm, reason).await
            }
        }
    }

    async fn compensate_step(&self, saga: SagaState, reason: String) -> Result<SagaState> {
        let saga = if saga.stage == SagaStage::Compensating {
            saga
        } else {
            self.transition(saga, SagaStage::Compensating).await?
        };
        let reservation_id = saga
            .reservation_id
            .ok_or_else(|| SagaError::Store(format!("saga {} has no reservation", saga.order_id)))?;

        let result = self
            .call(
                "release",
                || self.reservations.release(reservation_id),
                classify_inventory,
            )
            .await;

        match result {
            Ok(_) => self.finish_cancel(saga, reason).await,
            Err(StepError::Rejected(err)) => {
                let failure = err.reason_code().to_string();
                self.mark_stuck(saga, PendingStep::Release { reason }, failure)
                    .await
            }
            Err(StepError::Exhausted(failure)) => {
                self.mark_stuck(saga, PendingStep::Release { reason }, failure)
                    .await
            }
        }
    }

    /// Announces released stock and closes the saga as cancelled.
    async fn finish_cancel(&self, saga: SagaState, reason: String) -> Result<SagaState> {
        let event = FulfillmentEvent::StockReleased {
            order_id: saga.order_id,
            reason: reason.clone(),
        };
        match self.emit(event).await {
            Ok(()) => {
                let mut saga = saga;
                saga.cancel_reason = Some(reason);
                self.transition(saga, SagaStage::Cancelled).await
            }
            Err(failure) => {
                self.mark_stuck(saga, PendingStep::Release { reason }, failure)
                    .await
            }
        }
    }

    async fn transition(&self, mut saga: SagaState, to: SagaStage) -> Result<SagaState> {
        let from = saga.stage;
        saga.stage = to;
        saga.stuck = None;
        saga.updated_at = self.clock.now();
        let saved = self.store.update(saga).await?;

        metrics::counter!(
            "saga_transitions_total",
            "from" => from.as_str(),
            "to" => to.as_str()
        )
        .increment(1);
        tracing::info!(%from, %to, "saga transition");
        Ok(saved)
    }

    async fn mark_stuck(
        &self,
        mut saga: SagaState,
        step: PendingStep,
        reason: String,
    ) -> Result<SagaState> {
        metrics::counter!("saga_stuck_total", "step" => step.name()).increment(1);
        tracing::error!(
            step = step.name(),
            stage = %saga.stage,
            %reason,
            "saga stuck, operator intervention required"
        );

        let now = self.clock.now();
        saga.stuck = Some(StuckInfo {
            step,
            reason,
            since: now,
        });
        saga.updated_at = now;
        self.store.update(saga).await
    }

    fn acknowledge(&self, order_id: OrderId, reason: AckReason) -> Outcome {
        metrics::counter!("saga_events_acknowledged_total", "reason" => reason.as_str())
            .increment(1);
        match reason {
            AckReason::LatePayment => {
                metrics::counter!("saga_late_payments_total").increment(1);
                tracing::warn!(%order_id, "payment arrived after cancellation");
            }
            AckReason::Duplicate | AckReason::Stale => {
                tracing::debug!(%order_id, reason = reason.as_str(), "event acknowledged");
            }
        }
        Outcome::Acknowledged(reason)
    }

    /// Publishes with retry; on exhaustion returns the last failure.
    async fn emit(&self, event: FulfillmentEvent) -> std::result::Result<(), String> {
        let outbound = OutboundEvent::new(event, self.clock.now());
        let event_type = outbound.event_type();
        let result = self
            .call(
                "publish",
                || self.publisher.publish(outbound.clone()),
                |err: &SagaError| Failure::Transient(err.to_string()),
            )
            .await;

        match result {
            Ok(()) => {
                tracing::info!(event_type, "event emitted");
                Ok(())
            }
            Err(StepError::Rejected(err)) => Err(err.to_string()),
            Err(StepError::Exhausted(reason)) => Err(reason),
        }
    }

    /// Runs `op` under the call timeout, retrying transient failures.
    async fn call<T, E, F, Fut>(
        &self,
        step: &'static str,
        mut op: F,
        classify: impl Fn(&E) -> Failure,
    ) -> std::result::Result<T, StepError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let started = Instant::now();
        let mut attempt = 0;

        let result = loop {
            attempt += 1;
            let failure = match tokio::time::timeout(self.config.call_timeout, op()).await {
                Ok(Ok(value)) => break Ok(value),
                Ok(Err(err)) => match classify(&err) {
                    Failure::Permanent => break Err(StepError::Rejected(err)),
                    Failure::Transient(reason) => reason,
                },
                Err(_) => "timeout".to_string(),
            };

            if !self.config.retry.should_retry(attempt) {
                tracing::warn!(step, attempt, reason = %failure, "step retries exhausted");
                break Err(StepError::Exhausted(failure));
            }
            let delay = self.config.retry.delay_for(attempt);
            tracing::warn!(step, attempt, reason = %failure, ?delay, "step failed, retrying");
            tokio::time::sleep(delay).await;
        };

        metrics::histogram!("saga_step_duration_seconds", "step" => step)
            .record(started.elapsed().as_secs_f64());
        result
    }
}

#[async_trait]
impl<S, R, P> EventHandler for SagaCoordinator<S, R, P>
where
    S: SagaStore,
    R: ReservationService,
    P: EventPublisher,
{
    async fn handle(&self, event: &InboundEvent) -> std::result::Result<(), HandlerError> {
        match self.handle_event(event).await {
            Ok(_) => Ok(()),
            Err(err @ (SagaError::OutOfOrder { .. } | SagaError::Stuck(_))) => {
                Err(HandlerError::OutOfOrder(err.to_string()))
            }
            Err(err) => {
                tracing::warn!(error = %err, "saga could not handle event");
                Err(HandlerError::Retryable(err.to_string()))
            }
        }
    }
}
