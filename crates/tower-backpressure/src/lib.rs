//! Backpressure admission control for Tower services.
//!
//! This middleware sits in front of a request handler and enforces two
//! protective limits: a bound on the number of requests executing
//! concurrently, and an optional bound on the number of requests waiting
//! for an execution slot. A request that cannot be admitted within the
//! configured wait time is rejected with a structured overload payload so
//! callers can retry or shed load.
//!
//! # Basic Example
//!
//! ```rust
//! use tower::ServiceBuilder;
//! use tower_backpressure::{BackpressureConfig, OverloadError};
//!
//! # async fn example() {
//! // Allow at most 10 concurrent calls; reject the rest immediately.
//! let layer = BackpressureConfig::builder()
//!     .max_concurrent(10)
//!     .name("tool-server")
//!     .build();
//!
//! let service = ServiceBuilder::new()
//!     .layer(layer)
//!     .service_fn(|req: String| async move {
//!         // Your handler logic here
//!         Ok::<_, OverloadError>(req)
//!     });
//! # }
//! ```
//!
//! # Example with a Wait Queue
//!
//! Requests that find the execution gate full can wait, bounded in both
//! count and time:
//!
//! ```rust
//! use tower::ServiceBuilder;
//! use tower_backpressure::{BackpressureConfig, OverloadError};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let layer = BackpressureConfig::builder()
//!     .max_concurrent(5)
//!     .queue_size(10)
//!     .queue_timeout(Duration::from_secs(30))
//!     .name("queued-tool-server")
//!     .build();
//!
//! let service = ServiceBuilder::new()
//!     .layer(layer)
//!     .service_fn(|req: String| async move {
//!         Ok::<_, OverloadError>(req)
//!     });
//!
//! // A request now either executes immediately, waits up to 30 seconds for
//! // a slot, or is rejected with reason queue_full / queue_timeout.
//! # }
//! ```
//!
//! # Observing Overload
//!
//! Every rejection carries a JSON-RPC style payload, and an `on_overload`
//! sink sees it before the caller does:
//!
//! ```rust
//! use tower::ServiceBuilder;
//! use tower_backpressure::{BackpressureConfig, OverloadError};
//!
//! # async fn example() {
//! let layer = BackpressureConfig::builder()
//!     .max_concurrent(5)
//!     .on_overload(|payload| {
//!         eprintln!("rejected: {}", payload.to_json_rpc());
//!     })
//!     .build();
//!
//! let service = ServiceBuilder::new()
//!     .layer(layer)
//!     .service_fn(|req: String| async move {
//!         Ok::<_, OverloadError>(req)
//!     });
//! # }
//! ```
//!
//! # Inspecting Counters
//!
//! The layer (and every service it produces) exposes a coordinated
//! snapshot of occupancy and rejection counters:
//!
//! ```rust
//! use tower_backpressure::BackpressureConfig;
//!
//! let layer = BackpressureConfig::builder().max_concurrent(5).build();
//!
//! let metrics = layer.metrics();
//! assert_eq!(metrics.active, 0);
//! assert_eq!(metrics.total_rejected, 0);
//! ```
//!
//! # Error Handling
//!
//! Errors from the inner service pass through unchanged and are never
//! counted as rejections. Rejections surface as [`OverloadError`]; the
//! service error type only needs a `From<OverloadError>` impl. If the
//! caller drops the response future, every slot the request held is
//! released and no counter drifts.

pub mod config;
pub mod error;
pub mod events;
pub mod layer;
pub mod metrics;
pub mod service;

pub use config::{BackpressureConfig, BackpressureConfigBuilder};
pub use error::{
    OverloadData, OverloadError, OverloadPayload, RejectReason, Result,
    DEFAULT_OVERLOAD_ERROR_CODE, DEFAULT_RETRY_AFTER_MS, OVERLOAD_MESSAGE,
};
pub use events::{BackpressureEvent, BackpressureListener, FnListener};
pub use layer::BackpressureLayer;
pub use metrics::MetricsSnapshot;
pub use service::Backpressure;
