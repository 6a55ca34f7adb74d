use batch_worker_core::{Result, WorkerError};
use prometheus::core::Collector;
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, Registry, TextEncoder};

/// Shared handle to the process metrics registry.
///
/// Cloning is cheap and every clone observes the same metric families.
/// Individual metrics are atomic, so increments from any number of tasks
/// are never lost.
#[derive(Clone, Default)]
pub struct MetricsRegistry {
    registry: Registry,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        MetricsRegistry {
            registry: Registry::new(),
        }
    }

    /// Register a collector and hand it back for recording.
    pub fn register<C>(&self, collector: C) -> Result<C>
    where
        C: Collector + Clone + 'static,
    {
        self.registry
            .register(Box::new(collector.clone()))
            .map_err(|e| WorkerError::configuration(format!("metric registration failed: {}", e)))?;
        Ok(collector)
    }

    /// Like [`MetricsRegistry::register`], folding a failed metric
    /// construction into the same error.
    pub fn register_new<C>(&self, collector: prometheus::Result<C>) -> Result<C>
    where
        C: Collector + Clone + 'static,
    {
        let collector = collector
            .map_err(|e| WorkerError::configuration(format!("invalid metric definition: {}", e)))?;
        self.register(collector)
    }

    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }

    /// Full snapshot in the text exposition format.
    pub fn render(&self) -> prometheus::Result<String> {
        encode_text(&self.gather())
    }
}

pub(crate) fn encode_text(families: &[MetricFamily]) -> prometheus::Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{IntCounter, IntCounterVec, Opts};
    use std::thread;

    fn concurrent_increments(n: u64) -> u64 {
        let registry = MetricsRegistry::new();
        let counter = registry
            .register(IntCounter::new("test_increments_total", "Concurrent increments").unwrap())
            .unwrap();

        let threads = 8;
        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let counter = counter.clone();
                thread::spawn(move || {
                    let share = n / threads + u64::from(t < n % threads);
                    for _ in 0..share {
                        counter.inc();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let families = registry.gather();
        families[0].get_metric()[0].get_counter().get_value() as u64
    }

    #[test]
    fn test_no_lost_updates() {
        for n in [1, 100, 10_000] {
            assert_eq!(concurrent_increments(n), n);
        }
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = MetricsRegistry::new();
        let opts = Opts::new("test_calls_total", "Calls");
        registry
            .register(IntCounterVec::new(opts.clone(), &["method"]).unwrap())
            .unwrap();

        let result = registry.register(IntCounterVec::new(opts, &["method"]).unwrap());
        assert!(matches!(result, Err(WorkerError::Configuration(_))));
    }

    #[test]
    fn test_render_text_exposition() {
        let registry = MetricsRegistry::new();
        let counter = registry
            .register(IntCounter::new("test_rendered_total", "Rendered").unwrap())
            .unwrap();
        counter.inc_by(3);

        let text = registry.render().unwrap();
        assert!(text.contains("# TYPE test_rendered_total counter"));
        assert!(text.contains("test_rendered_total 3"));
    }
}
