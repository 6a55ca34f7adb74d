use async_trait::async_trait;
use batch_worker::handler::EchoHandler;
use batch_worker::{
    HandlerResult, LocalTaskQueue, RuntimeOptions, RuntimeState, WorkHandler, Worker,
    WorkerConfig, WorkerRuntime,
};
use batch_worker_core::{WorkOutcome, WorkUnit, WorkerError};
use batch_worker_metrics::MetricsRegistry;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::time::timeout;

const QUEUE: &str = "BatchWorkflow";

fn options(rate: u32) -> RuntimeOptions {
    RuntimeOptions {
        task_queue: QUEUE.to_string(),
        identity: "42@scenario-host".to_string(),
        max_activities_per_second: rate,
        poll_wait: Duration::from_millis(100),
        drain_timeout: Duration::from_secs(10),
        ..RuntimeOptions::default()
    }
}

fn counter(registry: &MetricsRegistry, name: &str) -> u64 {
    registry
        .gather()
        .iter()
        .filter(|family| family.get_name() == name)
        .flat_map(|family| family.get_metric())
        .map(|metric| metric.get_counter().get_value() as u64)
        .sum()
}

/// Blocks every execution until the test opens the gate.
struct GatedHandler {
    started: Arc<AtomicUsize>,
    gate: Arc<Semaphore>,
}

#[async_trait]
impl WorkHandler for GatedHandler {
    async fn execute(&self, input: Vec<u8>) -> HandlerResult {
        self.started.fetch_add(1, Ordering::SeqCst);
        let _permit = self.gate.acquire().await.map_err(|e| e.to_string())?;
        Ok(input)
    }
}

#[tokio::test]
async fn test_register_after_start_is_state_error() {
    let queue = Arc::new(LocalTaskQueue::new(QUEUE));
    let runtime = WorkerRuntime::new(queue, options(150), &MetricsRegistry::new()).unwrap();
    runtime.register_activity("Echo", EchoHandler).unwrap();
    runtime.start().unwrap();

    let err = runtime.register_activity("Late", EchoHandler).unwrap_err();
    assert!(matches!(err, WorkerError::State { .. }), "got: {}", err);
    assert!(!err.is_startup_fatal());

    let err = runtime.register_workflow("LateWorkflow", EchoHandler).unwrap_err();
    assert!(matches!(err, WorkerError::State { .. }));

    runtime.shutdown().await;
    assert_eq!(runtime.state(), RuntimeState::Stopped);
}

#[tokio::test]
async fn test_unknown_work_type_does_not_stop_polling() {
    let queue = Arc::new(LocalTaskQueue::new(QUEUE));
    let registry = MetricsRegistry::new();
    let runtime = WorkerRuntime::new(queue.clone(), options(150), &registry).unwrap();
    runtime.register_activity("Echo", EchoHandler).unwrap();
    runtime.start().unwrap();

    let unknown = WorkUnit::activity("Unregistered", b"lost".to_vec()).unwrap();
    queue.submit(unknown.clone());

    let completion = timeout(Duration::from_secs(5), queue.next_completion())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(completion.work_unit_id, unknown.id);
    match completion.outcome {
        WorkOutcome::Failed(message) => assert!(message.contains("Unregistered")),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(runtime.state(), RuntimeState::Polling);
    assert_eq!(counter(&registry, "batch_worker_dispatch_errors_total"), 1);

    // Later work is still dispatched normally.
    let echo = WorkUnit::activity("Echo", b"kept".to_vec()).unwrap();
    queue.submit(echo.clone());
    let completion = timeout(Duration::from_secs(5), queue.next_completion())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(completion.work_unit_id, echo.id);
    assert_eq!(completion.outcome, WorkOutcome::Completed(b"kept".to_vec()));

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_unknown_work_types_share_one_series() {
    let queue = Arc::new(LocalTaskQueue::new(QUEUE));
    let registry = MetricsRegistry::new();
    let runtime = WorkerRuntime::new(queue.clone(), options(150), &registry).unwrap();
    runtime.register_activity("Echo", EchoHandler).unwrap();
    runtime.start().unwrap();

    queue.submit(WorkUnit::activity("FirstStranger", Vec::new()).unwrap());
    queue.submit(WorkUnit::activity("SecondStranger", Vec::new()).unwrap());
    for _ in 0..2 {
        let completion = timeout(Duration::from_secs(5), queue.next_completion())
            .await
            .unwrap()
            .unwrap();
        assert!(!completion.outcome.is_success());
    }

    let families = registry.gather();
    let family = families
        .iter()
        .find(|family| family.get_name() == "batch_worker_dispatch_errors_total")
        .unwrap();
    assert_eq!(family.get_metric().len(), 1);
    let series = &family.get_metric()[0];
    assert_eq!(series.get_label()[0].get_value(), "activity");
    assert_eq!(series.get_counter().get_value() as u64, 2);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_workflow_and_activity_of_same_name_are_distinct() {
    let queue = Arc::new(LocalTaskQueue::new(QUEUE));
    let runtime = WorkerRuntime::new(queue.clone(), options(150), &MetricsRegistry::new()).unwrap();
    runtime.register_workflow("Echo", EchoHandler).unwrap();
    runtime.start().unwrap();

    queue.submit(WorkUnit::activity("Echo", Vec::new()).unwrap());
    let completion = timeout(Duration::from_secs(5), queue.next_completion())
        .await
        .unwrap()
        .unwrap();
    assert!(!completion.outcome.is_success());

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rate_limit_spreads_saturating_demand() {
    let queue = Arc::new(LocalTaskQueue::new(QUEUE));
    let registry = MetricsRegistry::new();
    let runtime = WorkerRuntime::new(queue.clone(), options(150), &registry).unwrap();
    runtime.register_activity("Echo", EchoHandler).unwrap();

    for i in 0..300u32 {
        queue.submit(WorkUnit::activity("Echo", i.to_be_bytes().to_vec()).unwrap());
    }
    runtime.start().unwrap();

    let mut first = None;
    let mut completed = 0;
    while completed < 300 {
        let completion = timeout(Duration::from_secs(10), queue.next_completion())
            .await
            .unwrap()
            .unwrap();
        assert!(completion.outcome.is_success());
        first.get_or_insert_with(Instant::now);
        completed += 1;
    }
    let spread = first.unwrap().elapsed();

    // One token up front, then 299 more at 150/s.
    assert!(spread >= Duration::from_millis(1900), "300 units finished in {:?}", spread);
    assert!(spread < Duration::from_secs(6), "300 units took {:?}", spread);
    assert_eq!(counter(&registry, "batch_worker_executions_started_total"), 300);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_drains_in_flight_and_accepts_nothing_new() {
    let queue = Arc::new(LocalTaskQueue::new(QUEUE));
    let runtime =
        Arc::new(WorkerRuntime::new(queue.clone(), options(150), &MetricsRegistry::new()).unwrap());

    let started = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Semaphore::new(0));
    runtime
        .register_activity(
            "Slow",
            GatedHandler {
                started: started.clone(),
                gate: gate.clone(),
            },
        )
        .unwrap();
    runtime.start().unwrap();

    for _ in 0..3 {
        queue.submit(WorkUnit::activity("Slow", b"record".to_vec()).unwrap());
    }
    timeout(Duration::from_secs(5), async {
        while started.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let mut states = runtime.subscribe();
    let draining = tokio::spawn({
        let runtime = runtime.clone();
        async move { runtime.shutdown().await }
    });
    states
        .wait_for(|state| *state == RuntimeState::Draining)
        .await
        .unwrap();

    // Submitted after the signal: must stay on the queue.
    queue.submit(WorkUnit::activity("Slow", b"late".to_vec()).unwrap());
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(started.load(Ordering::SeqCst), 3);
    assert_eq!(runtime.state(), RuntimeState::Draining);

    gate.add_permits(4);
    let report = draining.await.unwrap();

    assert_eq!(report.abandoned, 0);
    assert_eq!(runtime.state(), RuntimeState::Stopped);
    assert_eq!(queue.pending(), 1);

    let completions = queue.drain_completions().await;
    assert_eq!(completions.len(), 3);
    assert!(completions.iter().all(|c| c.outcome.is_success()));
}

#[tokio::test]
async fn test_drain_window_reports_abandoned_executions() {
    let queue = Arc::new(LocalTaskQueue::new(QUEUE));
    let runtime = WorkerRuntime::new(
        queue.clone(),
        RuntimeOptions {
            drain_timeout: Duration::from_millis(200),
            ..options(150)
        },
        &MetricsRegistry::new(),
    )
    .unwrap();

    let started = Arc::new(AtomicUsize::new(0));
    runtime
        .register_activity(
            "Stuck",
            GatedHandler {
                started: started.clone(),
                gate: Arc::new(Semaphore::new(0)),
            },
        )
        .unwrap();
    runtime.start().unwrap();

    queue.submit(WorkUnit::activity("Stuck", Vec::new()).unwrap());
    timeout(Duration::from_secs(5), async {
        while started.load(Ordering::SeqCst) < 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let report = runtime.shutdown().await;
    assert_eq!(report.abandoned, 1);
    assert_eq!(runtime.state(), RuntimeState::Stopped);
}

#[tokio::test]
async fn test_metrics_port_in_use_prevents_polling() {
    let occupied = TcpListener::bind("0.0.0.0:0").await.unwrap();
    let port = occupied.local_addr().unwrap().port();

    let mut config = WorkerConfig::default();
    config.metrics.port = port;

    let queue = Arc::new(LocalTaskQueue::new(QUEUE));
    queue.submit(WorkUnit::activity("Echo", Vec::new()).unwrap());

    let result = Worker::launch_with_service(&config, queue.clone(), |runtime| {
        runtime.register_activity("Echo", EchoHandler)
    })
    .await;

    let err = result.err().unwrap();
    assert!(matches!(err, WorkerError::PortInUse { port: p, .. } if p == port));
    assert!(err.is_startup_fatal());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(queue.pending(), 1);
}

#[tokio::test]
async fn test_worker_serves_runtime_metrics() {
    let mut config = WorkerConfig::default();
    config.metrics.port = 0;
    config.poll_wait_secs = 1;

    let queue = Arc::new(LocalTaskQueue::new(QUEUE));
    let worker = Worker::launch_with_service(&config, queue.clone(), |runtime| {
        runtime.register_activity("Echo", EchoHandler)
    })
    .await
    .unwrap();
    assert_eq!(worker.runtime().state(), RuntimeState::Polling);
    assert!(worker.metrics_addr().is_some());

    queue.submit(WorkUnit::activity("Echo", b"plum".to_vec()).unwrap());
    timeout(Duration::from_secs(5), queue.next_completion())
        .await
        .unwrap()
        .unwrap();

    let text = worker.metrics().render().unwrap();
    assert!(text.contains("batch_worker_executions_completed_total"));
    assert!(text.contains("outcome=\"completed\""));

    let report = worker.shutdown().await;
    assert_eq!(report.abandoned, 0);
}
