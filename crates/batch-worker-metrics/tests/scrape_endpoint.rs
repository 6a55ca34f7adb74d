use batch_worker_core::WorkerError;
use batch_worker_metrics::{MetricsConfig, MetricsPipeline, MetricsRegistry};
use prometheus::IntCounter;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

fn test_config(listen_addr: SocketAddr) -> MetricsConfig {
    MetricsConfig {
        listen_addr,
        report_interval: Duration::from_millis(100),
        ..Default::default()
    }
}

async fn start_pipeline() -> (MetricsPipeline, IntCounter) {
    let registry = MetricsRegistry::new();
    let counter = registry
        .register(IntCounter::new("batch_worker_test_events_total", "Events").unwrap())
        .unwrap();
    let pipeline = MetricsPipeline::start(test_config("127.0.0.1:0".parse().unwrap()), registry)
        .await
        .unwrap();
    (pipeline, counter)
}

async fn raw_request(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

async fn scrape(addr: SocketAddr) -> String {
    raw_request(
        addr,
        b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await
}

fn counter_value(response: &str) -> u64 {
    response
        .lines()
        .find_map(|line| line.strip_prefix("batch_worker_test_events_total "))
        .and_then(|value| value.trim().parse().ok())
        .unwrap()
}

#[tokio::test]
async fn test_scrape_returns_full_snapshot() {
    let (pipeline, counter) = start_pipeline().await;
    let addr = pipeline.local_addr().unwrap();

    counter.inc_by(42);
    let response = scrape(addr).await;

    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("text/plain; version=0.0.4"));
    assert_eq!(counter_value(&response), 42);

    // A second scrape still sees the full value, not a delta.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(counter_value(&scrape(addr).await), 42);

    pipeline.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_counter_is_monotonic_under_concurrent_increments() {
    let (pipeline, counter) = start_pipeline().await;
    let addr = pipeline.local_addr().unwrap();

    let writers: Vec<_> = (0..4)
        .map(|_| {
            let counter = counter.clone();
            tokio::spawn(async move {
                for _ in 0..500 {
                    counter.inc();
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    let mut previous = 0;
    for _ in 0..20 {
        let value = counter_value(&scrape(addr).await);
        assert!(value >= previous, "counter went from {} to {}", previous, value);
        previous = value;
    }

    for writer in writers {
        writer.await.unwrap();
    }
    assert_eq!(counter_value(&scrape(addr).await), 2000);

    pipeline.stop().await;
}

#[tokio::test]
async fn test_malformed_request_gets_client_error() {
    let (pipeline, counter) = start_pipeline().await;
    let addr = pipeline.local_addr().unwrap();

    let response = raw_request(addr, b"NOT AN HTTP REQUEST\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 400"), "got: {}", response);

    counter.inc();
    assert_eq!(counter_value(&scrape(addr).await), 1);

    pipeline.stop().await;
}

#[tokio::test]
async fn test_port_already_bound_fails_fast() {
    let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = occupied.local_addr().unwrap();

    let result = MetricsPipeline::start(test_config(addr), MetricsRegistry::new()).await;
    let err = result.err().unwrap();

    assert!(matches!(err, WorkerError::PortInUse { port, .. } if port == addr.port()));
    assert!(err.is_startup_fatal());
}

#[tokio::test]
async fn test_stop_closes_listener() {
    let (pipeline, _) = start_pipeline().await;
    let addr = pipeline.local_addr().unwrap();

    let started = tokio::time::Instant::now();
    pipeline.stop().await;
    assert!(started.elapsed() < Duration::from_secs(2));

    assert!(TcpStream::connect(addr).await.is_err());
}
