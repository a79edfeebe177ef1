//! Occupancy and rejection counters for the backpressure controller.

use crate::error::RejectReason;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};

/// Point-in-time view of a controller's counters.
///
/// All six fields are read under a single lock acquisition, so a snapshot is
/// always self-consistent: `total_rejected` equals the sum of the three
/// per-reason counters, and a promotion never shows up as a transient dip in
/// `active + queued`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Requests currently executing in the downstream service.
    pub active: usize,
    /// Requests currently waiting for an execution slot.
    pub queued: usize,
    /// Rejections for any reason since the controller was created.
    pub total_rejected: u64,
    /// Rejections because the gate was full with no queue configured.
    pub rejected_concurrency_limit: u64,
    /// Rejections because the wait queue was at capacity.
    pub rejected_queue_full: u64,
    /// Rejections because the queue deadline elapsed.
    pub rejected_queue_timeout: u64,
}

#[derive(Debug, Default)]
struct Counters {
    active: usize,
    queued: usize,
    total_rejected: u64,
    rejected_concurrency_limit: u64,
    rejected_queue_full: u64,
    rejected_queue_timeout: u64,
}

/// Shared counter cell for one controller.
///
/// Every mutation goes through one mutex, so multi-field transitions
/// (promotion, rejection bookkeeping) are indivisible to readers.
#[derive(Debug, Default)]
pub(crate) struct CounterCell {
    inner: Mutex<Counters>,
}

impl CounterCell {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.inner.lock().unwrap()
    }

    /// Increments `active`, returning the new value.
    pub(crate) fn incr_active(&self) -> usize {
        let mut c = self.lock();
        c.active += 1;
        c.active
    }

    /// Decrements `active`, returning the new value.
    pub(crate) fn decr_active(&self) -> usize {
        let mut c = self.lock();
        c.active -= 1;
        c.active
    }

    /// Increments `queued`, returning the new value.
    pub(crate) fn incr_queued(&self) -> usize {
        let mut c = self.lock();
        c.queued += 1;
        c.queued
    }

    /// Decrements `queued`, returning the new value.
    pub(crate) fn decr_queued(&self) -> usize {
        let mut c = self.lock();
        c.queued -= 1;
        c.queued
    }

    /// Moves one request from the queue into execution.
    ///
    /// Both fields change in the same critical section, so no snapshot can
    /// observe the request as missing from both. Returns the new
    /// `(active, queued)` pair.
    pub(crate) fn promote(&self) -> (usize, usize) {
        let mut c = self.lock();
        c.queued -= 1;
        c.active += 1;
        (c.active, c.queued)
    }

    /// Records a rejection and returns the counters the payload is built
    /// from.
    ///
    /// The increment and the read happen under the same lock, so the
    /// payload, the overload sink, and any snapshot taken after the caller
    /// observes the error all agree that this rejection has been counted.
    pub(crate) fn record_rejection(&self, reason: RejectReason) -> MetricsSnapshot {
        let mut c = self.lock();
        c.total_rejected += 1;
        match reason {
            RejectReason::ConcurrencyLimit => c.rejected_concurrency_limit += 1,
            RejectReason::QueueFull => c.rejected_queue_full += 1,
            RejectReason::QueueTimeout => c.rejected_queue_timeout += 1,
        }
        freeze(&c)
    }

    /// Coordinated snapshot of all six counters.
    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        freeze(&self.lock())
    }
}

fn freeze(c: &Counters) -> MetricsSnapshot {
    MetricsSnapshot {
        active: c.active,
        queued: c.queued,
        total_rejected: c.total_rejected,
        rejected_concurrency_limit: c.rejected_concurrency_limit,
        rejected_queue_full: c.rejected_queue_full,
        rejected_queue_timeout: c.rejected_queue_timeout,
    }
}
