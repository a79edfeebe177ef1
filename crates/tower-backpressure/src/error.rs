//! Error and rejection payload types for backpressure admission control.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default JSON-RPC error code carried by overload rejections.
pub const DEFAULT_OVERLOAD_ERROR_CODE: i32 = -32001;

/// Message carried by every overload rejection.
pub const OVERLOAD_MESSAGE: &str = "SERVER_OVERLOADED";

/// Default retry hint, in milliseconds, carried in rejection payloads.
pub const DEFAULT_RETRY_AFTER_MS: u64 = 1000;

/// Why a request was refused admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The execution gate is full and no wait queue is configured.
    ConcurrencyLimit,
    /// The execution gate is full and the wait queue is at capacity.
    QueueFull,
    /// The request waited in the queue until its deadline elapsed.
    QueueTimeout,
}

impl RejectReason {
    /// Wire name of the reason, as carried in the payload `data.reason` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::ConcurrencyLimit => "concurrency_limit",
            RejectReason::QueueFull => "queue_full",
            RejectReason::QueueTimeout => "queue_timeout",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `data` object of an overload rejection.
///
/// All fields are always present on the wire. The occupancy fields hold the
/// controller state at the moment the rejection was decided;
/// `queue_timeout_ms` is the configured timeout, not the elapsed wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverloadData {
    /// Which limit rejected the request.
    pub reason: RejectReason,
    /// Requests executing when the rejection was decided.
    pub active: usize,
    /// Requests waiting when the rejection was decided.
    pub queued: usize,
    /// Configured execution-gate capacity.
    pub max_concurrent: usize,
    /// Configured wait-queue capacity.
    pub queue_size: usize,
    /// Configured queue timeout in milliseconds.
    pub queue_timeout_ms: u64,
    /// Advisory delay before the caller should retry.
    #[serde(default = "default_retry_after_ms")]
    pub retry_after_ms: u64,
}

fn default_retry_after_ms() -> u64 {
    DEFAULT_RETRY_AFTER_MS
}

/// JSON-RPC error object describing an overload rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverloadPayload {
    /// JSON-RPC error code (default [`DEFAULT_OVERLOAD_ERROR_CODE`]).
    pub code: i32,
    /// Always [`OVERLOAD_MESSAGE`].
    pub message: String,
    /// Structured rejection detail.
    pub data: OverloadData,
}

impl OverloadPayload {
    /// Renders the payload as a JSON-RPC error value.
    pub fn to_json_rpc(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code,
            "message": self.message,
            "data": {
                "reason": self.data.reason.as_str(),
                "active": self.data.active,
                "queued": self.data.queued,
                "max_concurrent": self.data.max_concurrent,
                "queue_size": self.data.queue_size,
                "queue_timeout_ms": self.data.queue_timeout_ms,
                "retry_after_ms": self.data.retry_after_ms,
            },
        })
    }
}

/// Error returned to callers that were refused admission.
///
/// All three rejection reasons surface through this one type; callers
/// distinguish them via [`OverloadError::reason`] or the payload's
/// `data.reason` field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}: {}", .payload.message, .payload.data.reason)]
pub struct OverloadError {
    /// The rejection payload, ready for the wire.
    pub payload: OverloadPayload,
}

impl OverloadError {
    /// Which limit rejected the request.
    pub fn reason(&self) -> RejectReason {
        self.payload.data.reason
    }

    /// JSON-RPC error code for this rejection.
    pub fn code(&self) -> i32 {
        self.payload.code
    }

    /// Consumes the error, yielding the payload.
    pub fn into_payload(self) -> OverloadPayload {
        self.payload
    }
}

/// Result type for backpressure operations.
pub type Result<T> = std::result::Result<T, OverloadError>;
