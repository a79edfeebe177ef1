//! Admission controller stress tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tower::{Layer, Service, ServiceExt};
use tower_backpressure::{BackpressureLayer, OverloadError};

use super::ConcurrencyTracker;

#[derive(Debug)]
#[allow(dead_code)]
enum TestError {
    Overload(OverloadError),
}

impl From<OverloadError> for TestError {
    fn from(e: OverloadError) -> Self {
        TestError::Overload(e)
    }
}

/// Test: Thousands of requests draining through a deep queue
#[tokio::test]
#[ignore]
async fn stress_large_queue_drains_completely() {
    let tracker = ConcurrencyTracker::new();
    let tracker_clone = Arc::clone(&tracker);
    let processed = Arc::new(AtomicUsize::new(0));
    let processed_clone = Arc::clone(&processed);

    let svc = tower::service_fn(move |_req: u32| {
        let tracker = Arc::clone(&tracker_clone);
        let processed = Arc::clone(&processed_clone);
        async move {
            tracker.enter();
            sleep(Duration::from_millis(10)).await;
            processed.fetch_add(1, Ordering::Relaxed);
            tracker.exit();
            Ok::<_, TestError>(())
        }
    });

    let layer = BackpressureLayer::builder()
        .max_concurrent(10)
        .queue_size(1000)
        .queue_timeout(Duration::from_secs(30))
        .build();

    let service = layer.layer(svc);

    let start = Instant::now();
    let mut handles = vec![];

    // Queue 1000 requests with max concurrency of 10
    for i in 0..1000u32 {
        let mut svc = service.clone();
        handles.push(tokio::spawn(async move {
            svc.ready().await.unwrap().call(i).await
        }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let elapsed = start.elapsed();
    println!(
        "processed {} requests in {:?}, peak concurrency {}",
        processed.load(Ordering::Relaxed),
        elapsed,
        tracker.peak()
    );

    assert_eq!(processed.load(Ordering::Relaxed), 1000);
    assert!(tracker.peak() <= 10);
    assert_eq!(tracker.current(), 0);

    let metrics = layer.metrics();
    assert_eq!(metrics.active, 0);
    assert_eq!(metrics.queued, 0);
    assert_eq!(metrics.total_rejected, 0);
}

/// Test: Sustained overload keeps counters consistent
#[tokio::test]
#[ignore]
async fn stress_sustained_overload_counters_consistent() {
    let layer = BackpressureLayer::builder()
        .max_concurrent(8)
        .queue_size(16)
        .queue_timeout(Duration::from_millis(20))
        .build();

    let service = layer.layer(tower::service_fn(|_req: ()| async {
        sleep(Duration::from_millis(5)).await;
        Ok::<_, TestError>(())
    }));

    let completed = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));

    let mut handles = vec![];
    for wave in 0..100 {
        for _ in 0..100 {
            let mut svc = service.clone();
            let completed = Arc::clone(&completed);
            let rejected = Arc::clone(&rejected);
            handles.push(tokio::spawn(async move {
                match svc.ready().await.unwrap().call(()).await {
                    Ok(()) => completed.fetch_add(1, Ordering::SeqCst),
                    Err(TestError::Overload(_)) => rejected.fetch_add(1, Ordering::SeqCst),
                };
            }));
        }
        if wave % 10 == 0 {
            sleep(Duration::from_millis(10)).await;
        }
    }

    for handle in handles {
        handle.await.unwrap();
    }

    let metrics = layer.metrics();
    println!(
        "completed {}, rejected {}, counters: {:?}",
        completed.load(Ordering::SeqCst),
        rejected.load(Ordering::SeqCst),
        metrics
    );

    // Every caller is accounted for exactly once.
    assert_eq!(
        completed.load(Ordering::SeqCst) + rejected.load(Ordering::SeqCst),
        10_000
    );
    assert_eq!(metrics.total_rejected, rejected.load(Ordering::SeqCst) as u64);
    assert_eq!(
        metrics.total_rejected,
        metrics.rejected_concurrency_limit
            + metrics.rejected_queue_full
            + metrics.rejected_queue_timeout
    );
    assert_eq!(metrics.active, 0);
    assert_eq!(metrics.queued, 0);
}

/// Test: Waves of cancelled callers never leak permits
#[tokio::test]
#[ignore]
async fn stress_cancellation_churn_leaks_nothing() {
    let layer = BackpressureLayer::builder()
        .max_concurrent(4)
        .queue_size(8)
        .queue_timeout(Duration::from_secs(5))
        .build();

    let service = layer.layer(tower::service_fn(|_req: ()| async {
        sleep(Duration::from_millis(3)).await;
        Ok::<_, TestError>(())
    }));

    for _ in 0..50 {
        let mut handles = vec![];
        for i in 0..100 {
            let mut svc = service.clone();
            let handle = tokio::spawn(async move {
                let _ = svc.ready().await.unwrap().call(()).await;
            });
            // Cancel every third caller wherever it happens to be.
            if i % 3 == 0 {
                handle.abort();
            }
            handles.push(handle);
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    // Let in-flight drops settle, then prove full capacity is available.
    sleep(Duration::from_millis(100)).await;
    let metrics = layer.metrics();
    assert_eq!(metrics.active, 0);
    assert_eq!(metrics.queued, 0);

    let mut handles = vec![];
    for _ in 0..4 {
        let mut svc = service.clone();
        handles.push(tokio::spawn(async move {
            svc.ready().await.unwrap().call(()).await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }
}
