//! Tower layer implementation for backpressure admission control.

use crate::config::BackpressureConfig;
use crate::metrics::MetricsSnapshot;
use crate::service::{Backpressure, Controller};
use std::sync::Arc;
use tower::Layer;

#[cfg(feature = "metrics")]
use metrics::{describe_counter, describe_gauge};
#[cfg(feature = "metrics")]
use std::sync::Once;

#[cfg(feature = "metrics")]
static METRICS_INIT: Once = Once::new();

/// Layer that applies backpressure admission control.
///
/// One layer owns one controller instance: every service it wraps, and
/// every clone of such a service, shares the same execution gate, wait
/// queue, and counters. Build a second layer for an independent controller.
#[derive(Clone)]
pub struct BackpressureLayer {
    controller: Arc<Controller>,
}

impl BackpressureLayer {
    /// Creates a new backpressure layer with the given configuration.
    pub fn new(config: BackpressureConfig) -> Self {
        #[cfg(feature = "metrics")]
        METRICS_INIT.call_once(|| {
            describe_counter!(
                "backpressure_calls_admitted_total",
                "Total number of calls admitted to the downstream service"
            );
            describe_counter!(
                "backpressure_calls_queued_total",
                "Total number of calls that entered the wait queue"
            );
            describe_counter!(
                "backpressure_calls_rejected_total",
                "Total number of calls rejected, labelled by reason"
            );
            describe_counter!(
                "backpressure_calls_finished_total",
                "Total number of admitted calls that finished successfully"
            );
            describe_counter!(
                "backpressure_calls_failed_total",
                "Total number of admitted calls that failed downstream"
            );
            describe_counter!(
                "backpressure_listener_panics_total",
                "Total number of panics caught in event listeners"
            );
            describe_gauge!(
                "backpressure_active_calls",
                "Current number of executing calls"
            );
            describe_gauge!(
                "backpressure_queued_calls",
                "Current number of waiting calls"
            );
        });

        Self {
            controller: Arc::new(Controller::new(config)),
        }
    }

    /// Creates a new builder for configuring a backpressure layer.
    ///
    /// # Examples
    ///
    /// ```
    /// use tower_backpressure::BackpressureLayer;
    /// use std::time::Duration;
    ///
    /// let layer = BackpressureLayer::builder()
    ///     .max_concurrent(10)
    ///     .queue_size(20)
    ///     .queue_timeout(Duration::from_secs(5))
    ///     .build();
    /// ```
    pub fn builder() -> crate::BackpressureConfigBuilder {
        crate::BackpressureConfigBuilder::new()
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

impl<S> Layer<S> for BackpressureLayer {
    type Service = Backpressure<S>;

    fn layer(&self, service: S) -> Self::Service {
        Backpressure::new(service, Arc::clone(&self.controller))
    }
}
