use crate::bootstrap;
use crate::config::WorkerConfig;
use crate::runtime::{DrainReport, WorkerRuntime};
use batch_worker_client::TaskQueueService;
use batch_worker_core::Result;
use batch_worker_metrics::{MetricsPipeline, MetricsRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// A started worker process: metrics pipeline plus polling runtime.
///
/// Startup is all-or-nothing. If any step fails, everything acquired so
/// far is released and no poller has been spawned.
pub struct Worker {
    runtime: WorkerRuntime,
    pipeline: MetricsPipeline,
}

impl Worker {
    /// Connect to the orchestration service described by `config`.
    pub async fn launch<F>(config: &WorkerConfig, register: F) -> Result<Self>
    where
        F: FnOnce(&WorkerRuntime) -> Result<()>,
    {
        config.validate()?;
        let registry = MetricsRegistry::new();
        let pipeline = start_pipeline(config, &registry).await?;

        let client = bootstrap::connect(config, &registry).await?;
        Self::assemble(config, Arc::new(client), registry, pipeline, register)
    }

    /// Like [`Worker::launch`], polling `service` instead of a remote client.
    pub async fn launch_with_service<F>(
        config: &WorkerConfig,
        service: Arc<dyn TaskQueueService>,
        register: F,
    ) -> Result<Self>
    where
        F: FnOnce(&WorkerRuntime) -> Result<()>,
    {
        config.validate()?;
        let registry = MetricsRegistry::new();
        let pipeline = start_pipeline(config, &registry).await?;

        Self::assemble(config, service, registry, pipeline, register)
    }

    fn assemble<F>(
        config: &WorkerConfig,
        service: Arc<dyn TaskQueueService>,
        registry: MetricsRegistry,
        pipeline: MetricsPipeline,
        register: F,
    ) -> Result<Self>
    where
        F: FnOnce(&WorkerRuntime) -> Result<()>,
    {
        let runtime = WorkerRuntime::new(service, config.runtime_options(), &registry)?;
        register(&runtime)?;
        runtime.start()?;

        Ok(Worker { runtime, pipeline })
    }

    pub fn runtime(&self) -> &WorkerRuntime {
        &self.runtime
    }

    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.pipeline.local_addr()
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        self.pipeline.registry()
    }

    /// Drain the runtime, then close the scrape endpoint.
    pub async fn shutdown(self) -> DrainReport {
        let report = self.runtime.shutdown().await;
        self.pipeline.stop().await;
        info!("Worker stopped");
        report
    }
}

async fn start_pipeline(config: &WorkerConfig, registry: &MetricsRegistry) -> Result<MetricsPipeline> {
    let pipeline = MetricsPipeline::start(config.metrics_config(), registry.clone()).await?;
    if let Some(addr) = pipeline.local_addr() {
        info!("Metrics available at http://{}{}", addr, config.metrics.path);
    }
    Ok(pipeline)
}
