use crate::registry::MetricsRegistry;
use crate::reporter::{MetricsReporter, ReportSink, TracingSink};
use crate::server::ScrapeServer;
use batch_worker_core::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub listen_addr: SocketAddr,
    pub path: String,
    pub report_interval: Duration,
    pub shutdown_grace: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8085)),
            path: "/metrics".to_string(),
            report_interval: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(1),
        }
    }
}

/// Reporter loop plus scrape server over one shared registry.
///
/// Dropping the pipeline without calling [`MetricsPipeline::stop`] still
/// cancels both background tasks.
pub struct MetricsPipeline {
    registry: MetricsRegistry,
    server: Option<ScrapeServer>,
    reporter: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
    shutdown_grace: Duration,
}

impl MetricsPipeline {
    pub async fn start(config: MetricsConfig, registry: MetricsRegistry) -> Result<Self> {
        Self::start_with_sink(config, registry, Arc::new(TracingSink)).await
    }

    pub async fn start_with_sink(
        config: MetricsConfig,
        registry: MetricsRegistry,
        sink: Arc<dyn ReportSink>,
    ) -> Result<Self> {
        // Bind first: a taken port must fail before anything is spawned.
        let server = ScrapeServer::bind(config.listen_addr, &config.path, registry.clone()).await?;

        let shutdown = CancellationToken::new();
        let reporter = MetricsReporter::new(registry.clone(), config.report_interval, sink)
            .spawn(shutdown.clone());

        Ok(MetricsPipeline {
            registry,
            server: Some(server),
            reporter: Some(reporter),
            shutdown,
            shutdown_grace: config.shutdown_grace,
        })
    }

    pub fn registry(&self) -> &MetricsRegistry {
        &self.registry
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(ScrapeServer::local_addr)
    }

    pub async fn stop(mut self) {
        self.shutdown.cancel();

        if let Some(server) = self.server.take() {
            server.stop(self.shutdown_grace).await;
        }
        if let Some(reporter) = self.reporter.take() {
            reporter.abort();
        }

        info!("Metrics pipeline stopped");
    }
}

impl Drop for MetricsPipeline {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(reporter) = self.reporter.take() {
            reporter.abort();
        }
    }
}
