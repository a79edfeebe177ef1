//! Load simulation demonstrating backpressure behavior under a burst.
//!
//! Fires more concurrent requests than the controller can hold so all three
//! outcomes show up: immediate admission, queueing, and rejection.
//!
//! Run:
//!     cargo run --example load_simulation

use std::time::Duration;
use tower::{Service, ServiceBuilder, ServiceExt};
use tower_backpressure::{BackpressureConfig, OverloadError, RejectReason};

const MAX_CONCURRENT: usize = 5;
const QUEUE_SIZE: usize = 10;
const QUEUE_TIMEOUT: Duration = Duration::from_secs(2);
const TOTAL_REQUESTS: usize = 25;

#[tokio::main]
async fn main() {
    println!("{}", "=".repeat(60));
    println!("Backpressure Load Simulation");
    println!("{}", "=".repeat(60));

    let layer = BackpressureConfig::builder()
        .max_concurrent(MAX_CONCURRENT)
        .queue_size(QUEUE_SIZE)
        .queue_timeout(QUEUE_TIMEOUT)
        .name("load-simulation")
        .on_overload(|payload| {
            println!(
                "  OVERLOAD: {} (active={}, queued={})",
                payload.data.reason, payload.data.active, payload.data.queued,
            );
        })
        .build();

    let service = ServiceBuilder::new()
        .layer(layer.clone())
        .service_fn(|id: usize| async move {
            // Simulated tool execution
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, OverloadError>(id)
        });

    println!("\nConfiguration:");
    println!("  max_concurrent: {}", MAX_CONCURRENT);
    println!("  queue_size:     {}", QUEUE_SIZE);
    println!("  queue_timeout:  {:?}", QUEUE_TIMEOUT);
    println!("\nFiring {} concurrent requests...\n", TOTAL_REQUESTS);

    let mut handles = Vec::new();
    for id in 0..TOTAL_REQUESTS {
        let mut svc = service.clone();
        handles.push(tokio::spawn(async move {
            svc.ready().await?.call(id).await
        }));
    }

    let mut completed = 0usize;
    let mut rejected_by_reason = [0usize; 3];
    for handle in handles {
        match handle.await.expect("request task panicked") {
            Ok(_) => completed += 1,
            Err(overload) => {
                let slot = match overload.reason() {
                    RejectReason::ConcurrencyLimit => 0,
                    RejectReason::QueueFull => 1,
                    RejectReason::QueueTimeout => 2,
                };
                rejected_by_reason[slot] += 1;
            }
        }
    }

    let metrics = layer.metrics();
    println!("\nResults:");
    println!("  completed:                  {}", completed);
    println!("  rejected concurrency_limit: {}", rejected_by_reason[0]);
    println!("  rejected queue_full:        {}", rejected_by_reason[1]);
    println!("  rejected queue_timeout:     {}", rejected_by_reason[2]);
    println!("\nFinal controller metrics:");
    println!("  active:         {}", metrics.active);
    println!("  queued:         {}", metrics.queued);
    println!("  total_rejected: {}", metrics.total_rejected);
}
