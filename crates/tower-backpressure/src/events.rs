//! Event types and listener plumbing for the backpressure controller.

use crate::error::OverloadPayload;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Events emitted by a backpressure controller.
#[derive(Debug, Clone)]
pub enum BackpressureEvent {
    /// A request acquired an execution slot, either on the fast path or by
    /// promotion out of the wait queue.
    CallAdmitted {
        /// Name of the controller instance.
        name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// Number of executing requests, this one included.
        active: usize,
    },
    /// A request entered the wait queue.
    CallQueued {
        /// Name of the controller instance.
        name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// Number of waiting requests, this one included.
        queued: usize,
    },
    /// A request was refused admission.
    CallRejected {
        /// Name of the controller instance.
        name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// The rejection payload delivered to the caller.
        payload: OverloadPayload,
    },
    /// An admitted request finished successfully.
    CallFinished {
        /// Name of the controller instance.
        name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// Time from admission to completion.
        duration: Duration,
    },
    /// An admitted request failed in the downstream service.
    CallFailed {
        /// Name of the controller instance.
        name: String,
        /// When the event occurred.
        timestamp: Instant,
        /// Time from admission to failure.
        duration: Duration,
    },
}

impl BackpressureEvent {
    /// Returns the type of event (e.g. "call_admitted", "call_rejected").
    pub fn event_type(&self) -> &'static str {
        match self {
            BackpressureEvent::CallAdmitted { .. } => "call_admitted",
            BackpressureEvent::CallQueued { .. } => "call_queued",
            BackpressureEvent::CallRejected { .. } => "call_rejected",
            BackpressureEvent::CallFinished { .. } => "call_finished",
            BackpressureEvent::CallFailed { .. } => "call_failed",
        }
    }

    /// Returns the name of the controller instance that emitted this event.
    pub fn name(&self) -> &str {
        match self {
            BackpressureEvent::CallAdmitted { name, .. }
            | BackpressureEvent::CallQueued { name, .. }
            | BackpressureEvent::CallRejected { name, .. }
            | BackpressureEvent::CallFinished { name, .. }
            | BackpressureEvent::CallFailed { name, .. } => name,
        }
    }

    /// Returns when this event occurred.
    pub fn timestamp(&self) -> Instant {
        match self {
            BackpressureEvent::CallAdmitted { timestamp, .. }
            | BackpressureEvent::CallQueued { timestamp, .. }
            | BackpressureEvent::CallRejected { timestamp, .. }
            | BackpressureEvent::CallFinished { timestamp, .. }
            | BackpressureEvent::CallFailed { timestamp, .. } => *timestamp,
        }
    }
}

/// Trait for listening to backpressure events.
pub trait BackpressureListener: Send + Sync {
    /// Called synchronously when an event occurs.
    fn on_event(&self, event: &BackpressureEvent);
}

/// A simple function-based event listener.
pub struct FnListener<F>
where
    F: Fn(&BackpressureEvent) + Send + Sync,
{
    f: F,
}

impl<F> FnListener<F>
where
    F: Fn(&BackpressureEvent) + Send + Sync,
{
    /// Creates a new function-based listener.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> BackpressureListener for FnListener<F>
where
    F: Fn(&BackpressureEvent) + Send + Sync,
{
    fn on_event(&self, event: &BackpressureEvent) {
        (self.f)(event)
    }
}

/// The listeners registered on one controller.
#[derive(Clone, Default)]
pub(crate) struct EventListeners {
    listeners: Vec<Arc<dyn BackpressureListener>>,
}

impl EventListeners {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add<L>(&mut self, listener: L)
    where
        L: BackpressureListener + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    /// Emits an event to all registered listeners.
    ///
    /// A panicking listener is caught so the remaining listeners still run
    /// and the controller's counters stay untouched. With the `tracing`
    /// feature the panic is logged as a warning; with the `metrics` feature
    /// a counter is incremented.
    pub(crate) fn emit(&self, event: &BackpressureEvent) {
        for listener in &self.listeners {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.on_event(event);
            }));

            if let Err(_panic_payload) = result {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    controller = event.name(),
                    event_type = event.event_type(),
                    "backpressure event listener panicked"
                );

                #[cfg(feature = "metrics")]
                metrics::counter!(
                    "backpressure_listener_panics_total",
                    "controller" => event.name().to_string(),
                    "event_type" => event.event_type()
                )
                .increment(1);
            }
        }
    }
}
