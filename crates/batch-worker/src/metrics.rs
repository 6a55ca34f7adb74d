use batch_worker_core::Result;
use batch_worker_metrics::MetricsRegistry;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
};

/// Runtime metrics registered once per [`crate::WorkerRuntime`]
#[derive(Clone)]
pub struct WorkerMetrics {
    pub units_received: IntCounterVec,
    pub executions_started: IntCounterVec,
    pub executions_completed: IntCounterVec,
    pub dispatch_errors: IntCounterVec,
    pub execution_latency: HistogramVec,
    pub rate_limit_wait: Histogram,
    pub in_flight: IntGauge,
    pub poll_errors: IntCounter,
    pub respond_errors: IntCounter,
}

impl WorkerMetrics {
    pub fn register(registry: &MetricsRegistry) -> Result<Self> {
        let units_received = registry.register_new(IntCounterVec::new(
            Opts::new(
                "batch_worker_work_units_received_total",
                "Work units received from the task queue",
            ),
            &["kind"],
        ))?;

        let executions_started = registry.register_new(IntCounterVec::new(
            Opts::new(
                "batch_worker_executions_started_total",
                "Handler executions admitted by the rate limiter",
            ),
            &["kind", "work_type"],
        ))?;

        let executions_completed = registry.register_new(IntCounterVec::new(
            Opts::new(
                "batch_worker_executions_completed_total",
                "Handler executions finished, by outcome",
            ),
            &["kind", "work_type", "outcome"],
        ))?;

        let dispatch_errors = registry.register_new(IntCounterVec::new(
            Opts::new(
                "batch_worker_dispatch_errors_total",
                "Work units received for unregistered work types, by kind",
            ),
            &["kind"],
        ))?;

        let execution_latency = registry.register_new(HistogramVec::new(
            HistogramOpts::new(
                "batch_worker_execution_latency_seconds",
                "Handler execution time",
            ),
            &["kind", "work_type"],
        ))?;

        let rate_limit_wait = registry.register_new(Histogram::with_opts(
            HistogramOpts::new(
                "batch_worker_rate_limit_wait_seconds",
                "Time spent waiting for execution budget",
            )
            .buckets(vec![0.0, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        ))?;

        let in_flight = registry.register_new(IntGauge::new(
            "batch_worker_executions_in_flight",
            "Handler executions currently running",
        ))?;

        let poll_errors = registry.register_new(IntCounter::new(
            "batch_worker_poll_errors_total",
            "Failed task queue polls",
        ))?;

        let respond_errors = registry.register_new(IntCounter::new(
            "batch_worker_respond_errors_total",
            "Outcomes that could not be reported to the task queue",
        ))?;

        Ok(WorkerMetrics {
            units_received,
            executions_started,
            executions_completed,
            dispatch_errors,
            execution_latency,
            rate_limit_wait,
            in_flight,
            poll_errors,
            respond_errors,
        })
    }
}
