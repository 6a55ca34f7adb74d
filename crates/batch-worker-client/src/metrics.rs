use batch_worker_core::Result;
use batch_worker_metrics::MetricsRegistry;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts};

/// Per-method call accounting for the secure channel
#[derive(Clone)]
pub struct ChannelMetrics {
    pub requests: IntCounterVec,
    pub failures: IntCounterVec,
    pub latency: HistogramVec,
}

impl ChannelMetrics {
    pub fn register(registry: &MetricsRegistry) -> Result<Self> {
        let requests = registry.register_new(IntCounterVec::new(
            Opts::new(
                "batch_worker_rpc_requests_total",
                "Calls issued over the orchestration channel by method",
            ),
            &["method"],
        ))?;

        let failures = registry.register_new(IntCounterVec::new(
            Opts::new(
                "batch_worker_rpc_failures_total",
                "Failed calls over the orchestration channel by method",
            ),
            &["method"],
        ))?;

        let latency = registry.register_new(HistogramVec::new(
            HistogramOpts::new(
                "batch_worker_rpc_latency_seconds",
                "Call latency over the orchestration channel in seconds",
            ),
            &["method"],
        ))?;

        Ok(ChannelMetrics {
            requests,
            failures,
            latency,
        })
    }
}
