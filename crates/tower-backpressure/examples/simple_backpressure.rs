use std::time::Duration;
use tower::{Service, ServiceBuilder, ServiceExt};
use tower_backpressure::{BackpressureConfig, OverloadError};

#[tokio::main]
async fn main() {
    println!("Simple Backpressure Example\n");

    // Admit max 5 concurrent calls, queue up to 10 more for at most 30s.
    let config = BackpressureConfig::builder()
        .max_concurrent(5)
        .queue_size(10)
        .queue_timeout(Duration::from_secs(30))
        .name("demo-server")
        .build();

    // Create a simple service
    let service = tower::service_fn(|req: String| async move {
        println!("Processing: {}", req);
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok::<_, OverloadError>(format!("Response to: {}", req))
    });

    // Wrap with backpressure
    let mut admission_service = ServiceBuilder::new().layer(config).service(service);

    // Make some requests
    for i in 1..=3 {
        match admission_service.ready().await {
            Ok(svc) => {
                let response = svc.call(format!("Request {}", i)).await.unwrap();
                println!("{}", response);
            }
            Err(e) => {
                println!("Error: {}", e);
            }
        }
    }

    println!("\nAll requests completed!");
}
