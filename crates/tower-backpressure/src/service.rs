//! Backpressure service implementation.
//!
//! The admission state machine lives here: the execution gate, the bounded
//! wait queue, and the RAII slot guards that make every exit path (success,
//! downstream failure, deadline, future drop) release exactly what it
//! acquired.

use crate::config::BackpressureConfig;
use crate::error::{
    OverloadData, OverloadError, OverloadPayload, RejectReason, DEFAULT_RETRY_AFTER_MS,
    OVERLOAD_MESSAGE,
};
use crate::events::BackpressureEvent;
use crate::metrics::{CounterCell, MetricsSnapshot};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tower::Service;

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Shared admission state for one controller instance.
///
/// Every service produced by one [`BackpressureLayer`](crate::BackpressureLayer),
/// and every clone of such a service, points at the same controller and so
/// shares its limits and counters.
pub(crate) struct Controller {
    gate: Arc<Semaphore>,
    waiting: Option<Arc<Semaphore>>,
    counters: CounterCell,
    config: BackpressureConfig,
}

impl Controller {
    pub(crate) fn new(config: BackpressureConfig) -> Self {
        let waiting = if config.queue_size > 0 {
            Some(Arc::new(Semaphore::new(config.queue_size)))
        } else {
            None
        };
        Self {
            gate: Arc::new(Semaphore::new(config.max_concurrent)),
            waiting,
            counters: CounterCell::new(),
            config,
        }
    }

    pub(crate) fn metrics(&self) -> MetricsSnapshot {
        self.counters.snapshot()
    }

    /// Runs the admission state machine for one request.
    ///
    /// Returns an [`ExecutionSlot`] whose drop gives back the gate permit
    /// and the `active` count, or the overload error for the caller.
    async fn admit(self: Arc<Self>) -> Result<ExecutionSlot, OverloadError> {
        // Fast path: take a gate permit if one is free right now. The
        // try-acquire is a single atomic step; checking fullness first and
        // acquiring second would race with concurrent releases.
        if let Ok(permit) = Arc::clone(&self.gate).try_acquire_owned() {
            return Ok(ExecutionSlot::enter(&self, permit));
        }

        let waiting = match &self.waiting {
            Some(waiting) => waiting,
            None => return Err(self.reject(RejectReason::ConcurrencyLimit)),
        };

        let slot = match Arc::clone(waiting).try_acquire_owned() {
            Ok(permit) => WaitingSlot::enter(&self, permit),
            Err(_) => return Err(self.reject(RejectReason::QueueFull)),
        };

        // The deadline runs from the moment the waiter entered the queue,
        // on the runtime's monotonic clock.
        let acquire = Arc::clone(&self.gate).acquire_owned();
        match tokio::time::timeout(self.config.queue_timeout, acquire).await {
            Ok(Ok(permit)) => Ok(ExecutionSlot::promote(slot, permit)),
            // Deadline elapsed. (The gate semaphore is never closed, so the
            // inner acquire cannot fail any other way.)
            _ => {
                drop(slot);
                Err(self.reject(RejectReason::QueueTimeout))
            }
        }
    }

    /// Books a rejection and builds the error delivered to the caller.
    ///
    /// The reason counter is incremented before the payload is built, under
    /// the same lock the snapshot is read from: a snapshot taken in the
    /// caller's error handler always already counts this rejection.
    fn reject(&self, reason: RejectReason) -> OverloadError {
        let snapshot = self.counters.record_rejection(reason);
        let payload = OverloadPayload {
            code: self.config.overload_error_code,
            message: OVERLOAD_MESSAGE.to_string(),
            data: OverloadData {
                reason,
                active: snapshot.active,
                queued: snapshot.queued,
                max_concurrent: self.config.max_concurrent,
                queue_size: self.config.queue_size,
                queue_timeout_ms: self.config.queue_timeout.as_millis() as u64,
                retry_after_ms: DEFAULT_RETRY_AFTER_MS,
            },
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(
            controller = %self.config.name,
            reason = %reason,
            active = snapshot.active,
            queued = snapshot.queued,
            "request rejected"
        );

        #[cfg(feature = "metrics")]
        counter!(
            "backpressure_calls_rejected_total",
            "controller" => self.config.name.clone(),
            "reason" => reason.as_str()
        )
        .increment(1);

        // No semaphore is held here, so a slow or panicking sink cannot
        // stall promotion of other waiters.
        self.config
            .event_listeners
            .emit(&BackpressureEvent::CallRejected {
                name: self.config.name.clone(),
                timestamp: Instant::now(),
                payload: payload.clone(),
            });

        OverloadError { payload }
    }
}

/// Occupies one wait-queue slot.
///
/// Dropping the guard returns the slot and the `queued` count, unless the
/// request was promoted into execution first. Dropping is also the
/// cancellation path: a caller abandoning the response future mid-wait
/// unwinds through here.
struct WaitingSlot {
    controller: Arc<Controller>,
    permit: Option<OwnedSemaphorePermit>,
    promoted: bool,
}

impl WaitingSlot {
    fn enter(controller: &Arc<Controller>, permit: OwnedSemaphorePermit) -> Self {
        let queued = controller.counters.incr_queued();

        #[cfg(feature = "metrics")]
        {
            counter!(
                "backpressure_calls_queued_total",
                "controller" => controller.config.name.clone()
            )
            .increment(1);
            gauge!(
                "backpressure_queued_calls",
                "controller" => controller.config.name.clone()
            )
            .set(queued as f64);
        }

        controller
            .config
            .event_listeners
            .emit(&BackpressureEvent::CallQueued {
                name: controller.config.name.clone(),
                timestamp: Instant::now(),
                queued,
            });

        Self {
            controller: Arc::clone(controller),
            permit: Some(permit),
            promoted: false,
        }
    }
}

impl Drop for WaitingSlot {
    fn drop(&mut self) {
        // The queue permit itself is released by dropping `permit`.
        if !self.promoted {
            let queued = self.controller.counters.decr_queued();

            #[cfg(feature = "metrics")]
            gauge!(
                "backpressure_queued_calls",
                "controller" => self.controller.config.name.clone()
            )
            .set(queued as f64);

            #[cfg(not(feature = "metrics"))]
            let _ = queued;
        }
    }
}

/// Holds the execution-gate permit and the `active` count for one request.
struct ExecutionSlot {
    controller: Arc<Controller>,
    _permit: OwnedSemaphorePermit,
}

impl ExecutionSlot {
    fn enter(controller: &Arc<Controller>, permit: OwnedSemaphorePermit) -> Self {
        let active = controller.counters.incr_active();
        Self::admitted(controller, active);
        Self {
            controller: Arc::clone(controller),
            _permit: permit,
        }
    }

    /// Moves a waiter into execution.
    ///
    /// `queued` goes down and `active` goes up in one critical section, so
    /// no snapshot sees the request in neither place. The wait-queue slot is
    /// released; the gate permit transfers into the new guard.
    fn promote(mut slot: WaitingSlot, permit: OwnedSemaphorePermit) -> Self {
        let controller = Arc::clone(&slot.controller);
        let (active, queued) = controller.counters.promote();
        slot.promoted = true;
        drop(slot.permit.take());
        drop(slot);

        #[cfg(feature = "metrics")]
        gauge!(
            "backpressure_queued_calls",
            "controller" => controller.config.name.clone()
        )
        .set(queued as f64);

        #[cfg(not(feature = "metrics"))]
        let _ = queued;

        Self::admitted(&controller, active);
        Self {
            controller,
            _permit: permit,
        }
    }

    fn admitted(controller: &Arc<Controller>, active: usize) {
        #[cfg(feature = "metrics")]
        {
            counter!(
                "backpressure_calls_admitted_total",
                "controller" => controller.config.name.clone()
            )
            .increment(1);
            gauge!(
                "backpressure_active_calls",
                "controller" => controller.config.name.clone()
            )
            .set(active as f64);
        }

        controller
            .config
            .event_listeners
            .emit(&BackpressureEvent::CallAdmitted {
                name: controller.config.name.clone(),
                timestamp: Instant::now(),
                active,
            });
    }
}

impl Drop for ExecutionSlot {
    fn drop(&mut self) {
        let active = self.controller.counters.decr_active();

        #[cfg(feature = "metrics")]
        gauge!(
            "backpressure_active_calls",
            "controller" => self.controller.config.name.clone()
        )
        .set(active as f64);

        #[cfg(not(feature = "metrics"))]
        let _ = active;
    }
}

/// Backpressure service that admission-controls calls to an inner service.
#[derive(Clone)]
pub struct Backpressure<S> {
    inner: S,
    controller: Arc<Controller>,
}

impl<S> Backpressure<S> {
    pub(crate) fn new(inner: S, controller: Arc<Controller>) -> Self {
        Self { inner, controller }
    }

    /// Coordinated snapshot of the controller's counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.controller.metrics()
    }

    /// Requests currently executing in the downstream service.
    pub fn active(&self) -> usize {
        self.controller.metrics().active
    }

    /// Requests currently waiting for an execution slot.
    pub fn queued(&self) -> usize {
        self.controller.metrics().queued
    }
}

impl<S, Request> Service<Request> for Backpressure<S>
where
    S: Service<Request> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    S::Error: From<OverloadError> + Send + 'static,
    Request: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let controller = Arc::clone(&self.controller);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let slot = match Arc::clone(&controller).admit().await {
                Ok(slot) => slot,
                Err(overload) => return Err(overload.into()),
            };

            let started = Instant::now();
            let result = inner.call(request).await;
            drop(slot);

            let duration = started.elapsed();
            match &result {
                Ok(_) => {
                    #[cfg(feature = "metrics")]
                    counter!(
                        "backpressure_calls_finished_total",
                        "controller" => controller.config.name.clone()
                    )
                    .increment(1);

                    controller
                        .config
                        .event_listeners
                        .emit(&BackpressureEvent::CallFinished {
                            name: controller.config.name.clone(),
                            timestamp: Instant::now(),
                            duration,
                        });
                }
                Err(_) => {
                    #[cfg(feature = "metrics")]
                    counter!(
                        "backpressure_calls_failed_total",
                        "controller" => controller.config.name.clone()
                    )
                    .increment(1);

                    controller
                        .config
                        .event_listeners
                        .emit(&BackpressureEvent::CallFailed {
                            name: controller.config.name.clone(),
                            timestamp: Instant::now(),
                            duration,
                        });
                }
            }

            result
        })
    }
}
