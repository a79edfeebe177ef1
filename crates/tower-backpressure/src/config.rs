//! Configuration for the backpressure controller.

use crate::error::{OverloadPayload, DEFAULT_OVERLOAD_ERROR_CODE};
use crate::events::{BackpressureEvent, EventListeners, FnListener};
use std::time::Duration;

/// Configuration for one backpressure controller instance.
#[derive(Clone)]
pub struct BackpressureConfig {
    /// Maximum number of requests executing concurrently.
    pub(crate) max_concurrent: usize,
    /// Maximum number of requests waiting for an execution slot.
    /// Zero disables the wait queue.
    pub(crate) queue_size: usize,
    /// Maximum time a request may spend in the wait queue.
    pub(crate) queue_timeout: Duration,
    /// JSON-RPC error code carried by rejection payloads.
    pub(crate) overload_error_code: i32,
    /// Name of this controller instance.
    pub(crate) name: String,
    /// Event listeners.
    pub(crate) event_listeners: EventListeners,
}

impl BackpressureConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> BackpressureConfigBuilder {
        BackpressureConfigBuilder::new()
    }
}

/// Builder for backpressure configuration.
pub struct BackpressureConfigBuilder {
    max_concurrent: usize,
    queue_size: usize,
    queue_timeout: Duration,
    overload_error_code: i32,
    name: String,
    event_listeners: EventListeners,
}

impl BackpressureConfigBuilder {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self {
            max_concurrent: 25,
            queue_size: 0,
            queue_timeout: Duration::from_secs(30),
            overload_error_code: DEFAULT_OVERLOAD_ERROR_CODE,
            name: "backpressure".to_string(),
            event_listeners: EventListeners::new(),
        }
    }

    /// Sets the maximum number of concurrently executing requests.
    ///
    /// Must be at least 1. Default: 25
    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Sets the wait-queue capacity.
    ///
    /// With a queue of zero (the default), requests that find the execution
    /// gate full are rejected immediately with reason `concurrency_limit`.
    pub fn queue_size(mut self, size: usize) -> Self {
        self.queue_size = size;
        self
    }

    /// Sets the maximum time a request may wait for an execution slot.
    ///
    /// Measured on a monotonic clock from the moment the request enters the
    /// queue. Must be non-zero. Default: 30 seconds
    pub fn queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = timeout;
        self
    }

    /// Sets the JSON-RPC error code carried by rejection payloads.
    ///
    /// Default: −32001
    pub fn overload_error_code(mut self, code: i32) -> Self {
        self.overload_error_code = code;
        self
    }

    /// Sets the name of this controller instance.
    ///
    /// The name labels events and, with the `metrics` feature, every
    /// exported metric. Default: "backpressure"
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Registers a sink invoked synchronously with every rejection payload.
    ///
    /// The sink runs after rejection counters are updated and before the
    /// caller observes the error, and never while the controller holds an
    /// execution or queue slot on the rejected request's behalf. A
    /// panicking sink is isolated; the rejection is still delivered.
    ///
    /// # Example
    /// ```rust,no_run
    /// use tower_backpressure::BackpressureConfig;
    ///
    /// let layer = BackpressureConfig::builder()
    ///     .max_concurrent(10)
    ///     .on_overload(|payload| {
    ///         eprintln!(
    ///             "overload: {} (active={}, queued={})",
    ///             payload.data.reason, payload.data.active, payload.data.queued,
    ///         );
    ///     })
    ///     .build();
    /// ```
    pub fn on_overload<F>(mut self, f: F) -> Self
    where
        F: Fn(&OverloadPayload) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let BackpressureEvent::CallRejected { payload, .. } = event {
                f(payload);
            }
        }));
        self
    }

    /// Registers a callback for each admitted request.
    ///
    /// Called with the number of executing requests, the admitted one
    /// included, on both the fast path and promotion out of the queue.
    pub fn on_admitted<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let BackpressureEvent::CallAdmitted { active, .. } = event {
                f(*active);
            }
        }));
        self
    }

    /// Registers a callback for each request that enters the wait queue.
    ///
    /// Called with the number of waiting requests, the new one included.
    pub fn on_queued<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let BackpressureEvent::CallQueued { queued, .. } = event {
                f(*queued);
            }
        }));
        self
    }

    /// Registers a callback for each admitted request that completes
    /// successfully, with the time from admission to completion.
    pub fn on_finished<F>(mut self, f: F) -> Self
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let BackpressureEvent::CallFinished { duration, .. } = event {
                f(*duration);
            }
        }));
        self
    }

    /// Registers a callback for each admitted request whose downstream call
    /// fails, with the time from admission to failure.
    pub fn on_failed<F>(mut self, f: F) -> Self
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let BackpressureEvent::CallFailed { duration, .. } = event {
                f(*duration);
            }
        }));
        self
    }

    /// Builds the configuration and returns a [`BackpressureLayer`].
    ///
    /// # Panics
    ///
    /// Panics if `max_concurrent` is zero or `queue_timeout` is zero.
    /// Limits are validated here, at construction, not at first use.
    ///
    /// [`BackpressureLayer`]: crate::layer::BackpressureLayer
    pub fn build(self) -> crate::layer::BackpressureLayer {
        if self.max_concurrent < 1 {
            panic!("max_concurrent must be >= 1, got {}", self.max_concurrent);
        }
        if self.queue_timeout.is_zero() {
            panic!("queue_timeout must be > 0");
        }

        let config = BackpressureConfig {
            max_concurrent: self.max_concurrent,
            queue_size: self.queue_size,
            queue_timeout: self.queue_timeout,
            overload_error_code: self.overload_error_code,
            name: self.name,
            event_listeners: self.event_listeners,
        };
        crate::layer::BackpressureLayer::new(config)
    }
}

impl Default for BackpressureConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
