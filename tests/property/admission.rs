//! Property tests for the admission controller.
//!
//! Invariants tested:
//! - Concurrent executions never exceed max_concurrent
//! - Queued requests never exceed queue_size
//! - total_rejected always equals the sum of the per-reason counters
//! - Occupancy drains to zero once every caller has returned
//! - Every caller either completes or observes a counted rejection

use proptest::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tower::{Layer, Service, ServiceExt};
use tower_backpressure::{BackpressureConfig, OverloadError};

#[derive(Debug)]
enum TestError {
    Overload(OverloadError),
}

impl From<OverloadError> for TestError {
    fn from(e: OverloadError) -> Self {
        TestError::Overload(e)
    }
}

/// Test service that tracks concurrent executions
#[derive(Clone)]
struct ConcurrencyTracker {
    current: Arc<AtomicUsize>,
    max_seen: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
    work_duration_ms: u64,
}

impl ConcurrencyTracker {
    fn new(work_duration_ms: u64) -> Self {
        Self {
            current: Arc::new(AtomicUsize::new(0)),
            max_seen: Arc::new(AtomicUsize::new(0)),
            completed: Arc::new(AtomicUsize::new(0)),
            work_duration_ms,
        }
    }
}

impl tower::Service<()> for ConcurrencyTracker {
    type Response = ();
    type Error = TestError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: ()) -> Self::Future {
        let current = Arc::clone(&self.current);
        let max_seen = Arc::clone(&self.max_seen);
        let completed = Arc::clone(&self.completed);
        let duration = self.work_duration_ms;

        Box::pin(async move {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(duration)).await;
            current.fetch_sub(1, Ordering::SeqCst);
            completed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Property: limits hold at every sampling point, counters stay
    /// consistent, and occupancy drains once the burst completes.
    #[test]
    fn admission_invariants_hold_under_random_load(
        max_concurrent in 1usize..=10,
        queue_size in 0usize..=10,
        num_requests in 1usize..=60,
        work_duration_ms in 1u64..=5,
    ) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let tracker = ConcurrencyTracker::new(work_duration_ms);
            let max_seen = Arc::clone(&tracker.max_seen);
            let completed = Arc::clone(&tracker.completed);

            let layer = BackpressureConfig::builder()
                .max_concurrent(max_concurrent)
                .queue_size(queue_size)
                .queue_timeout(Duration::from_millis(50))
                .build();
            let service = layer.layer(tracker);

            // Sample snapshots continuously while the burst runs.
            let done = Arc::new(AtomicBool::new(false));
            let violations = Arc::new(AtomicUsize::new(0));
            let sampler_done = Arc::clone(&done);
            let sampler_violations = Arc::clone(&violations);
            let sampler_layer = layer.clone();
            let sampler = tokio::spawn(async move {
                while !sampler_done.load(Ordering::SeqCst) {
                    let m = sampler_layer.metrics();
                    let consistent = m.active <= max_concurrent
                        && m.queued <= queue_size
                        && m.total_rejected
                            == m.rejected_concurrency_limit
                                + m.rejected_queue_full
                                + m.rejected_queue_timeout;
                    if !consistent {
                        sampler_violations.fetch_add(1, Ordering::SeqCst);
                    }
                    tokio::task::yield_now().await;
                }
            });

            let mut handles = vec![];
            for _ in 0..num_requests {
                let mut svc = service.clone();
                handles.push(tokio::spawn(async move {
                    svc.ready().await.unwrap().call(()).await
                }));
            }

            let mut rejected_seen = 0u64;
            for handle in handles {
                match handle.await.unwrap() {
                    Ok(()) => {}
                    Err(TestError::Overload(e)) => {
                        rejected_seen += 1;
                        // The payload echoes the configuration and stays
                        // within the configured bounds.
                        prop_assert!(e.payload.data.active <= max_concurrent);
                        prop_assert!(e.payload.data.queued <= queue_size);
                        prop_assert_eq!(e.payload.data.max_concurrent, max_concurrent);
                        prop_assert_eq!(e.payload.data.queue_size, queue_size);
                        prop_assert_eq!(e.payload.data.queue_timeout_ms, 50);
                    }
                }
            }

            done.store(true, Ordering::SeqCst);
            sampler.await.unwrap();

            prop_assert_eq!(violations.load(Ordering::SeqCst), 0);
            prop_assert!(max_seen.load(Ordering::SeqCst) <= max_concurrent);

            let m = layer.metrics();
            prop_assert_eq!(m.active, 0);
            prop_assert_eq!(m.queued, 0);
            prop_assert_eq!(m.total_rejected, rejected_seen);
            prop_assert_eq!(
                completed.load(Ordering::SeqCst) as u64 + rejected_seen,
                num_requests as u64
            );

            Ok(())
        })?;
    }

    /// Property: with a queue wide enough for the whole burst, nothing is
    /// rejected and every request completes (no deadlock).
    #[test]
    fn oversized_queue_admits_everything(
        max_concurrent in 1usize..=8,
        num_requests in 1usize..=40,
    ) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let tracker = ConcurrencyTracker::new(1);
            let completed = Arc::clone(&tracker.completed);

            let layer = BackpressureConfig::builder()
                .max_concurrent(max_concurrent)
                .queue_size(num_requests)
                .queue_timeout(Duration::from_secs(10))
                .build();
            let service = layer.layer(tracker);

            let mut handles = vec![];
            for _ in 0..num_requests {
                let mut svc = service.clone();
                handles.push(tokio::spawn(async move {
                    svc.ready().await.unwrap().call(()).await
                }));
            }

            for handle in handles {
                prop_assert!(handle.await.unwrap().is_ok());
            }

            let m = layer.metrics();
            prop_assert_eq!(m.total_rejected, 0);
            prop_assert_eq!(m.active, 0);
            prop_assert_eq!(m.queued, 0);
            prop_assert_eq!(completed.load(Ordering::SeqCst), num_requests);

            Ok(())
        })?;
    }
}
