use crate::registry::{encode_text, MetricsRegistry};
use prometheus::proto::{Metric, MetricFamily, MetricType};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Destination for the per-interval delta report
pub trait ReportSink: Send + Sync {
    fn report(&self, delta: &str);
}

/// Writes each delta report through `tracing` at debug level
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn report(&self, delta: &str) {
        debug!("metrics delta:\n{}", delta);
    }
}

#[derive(Debug, Clone)]
enum SeriesSnapshot {
    Counter(f64),
    Histogram { count: u64, sum: f64, buckets: Vec<u64> },
}

/// Periodically flushes what changed in the registry since the last tick.
pub struct MetricsReporter {
    registry: MetricsRegistry,
    interval: Duration,
    sink: Arc<dyn ReportSink>,
    previous: HashMap<String, SeriesSnapshot>,
}

impl MetricsReporter {
    pub fn new(registry: MetricsRegistry, interval: Duration, sink: Arc<dyn ReportSink>) -> Self {
        MetricsReporter {
            registry,
            interval,
            sink,
            previous: HashMap::new(),
        }
    }

    /// Render the delta since the previous tick.
    ///
    /// Counters and histograms are reported as increments, gauges as their
    /// current value.
    pub fn tick(&mut self) -> prometheus::Result<String> {
        let mut families = self.registry.gather();

        for family in families.iter_mut() {
            self.apply_delta(family);
        }

        encode_text(&families)
    }

    fn apply_delta(&mut self, family: &mut MetricFamily) {
        let field_type = family.get_field_type();
        let name = family.get_name().to_string();

        for metric in family.mut_metric().iter_mut() {
            let key = series_key(&name, metric);

            match field_type {
                MetricType::COUNTER => {
                    let current = metric.get_counter().get_value();
                    let before = match self.previous.get(&key) {
                        Some(SeriesSnapshot::Counter(value)) => *value,
                        _ => 0.0,
                    };
                    metric.mut_counter().set_value(current - before);
                    self.previous.insert(key, SeriesSnapshot::Counter(current));
                }
                MetricType::HISTOGRAM => {
                    let histogram = metric.get_histogram();
                    let count = histogram.get_sample_count();
                    let sum = histogram.get_sample_sum();
                    let buckets: Vec<u64> = histogram
                        .get_bucket()
                        .iter()
                        .map(|b| b.get_cumulative_count())
                        .collect();

                    if let Some(SeriesSnapshot::Histogram {
                        count: prev_count,
                        sum: prev_sum,
                        buckets: prev_buckets,
                    }) = self.previous.get(&key)
                    {
                        let delta = metric.mut_histogram();
                        delta.set_sample_count(count.saturating_sub(*prev_count));
                        delta.set_sample_sum(sum - prev_sum);
                        for (bucket, prev) in delta.mut_bucket().iter_mut().zip(prev_buckets) {
                            let current = bucket.get_cumulative_count();
                            bucket.set_cumulative_count(current.saturating_sub(*prev));
                        }
                    }

                    self.previous
                        .insert(key, SeriesSnapshot::Histogram { count, sum, buckets });
                }
                _ => {}
            }
        }
    }

    /// Run the reporting loop until `shutdown` fires. Nothing is flushed on stop.
    pub fn spawn(mut self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so every report covers a full interval.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        match self.tick() {
                            Ok(delta) => self.sink.report(&delta),
                            Err(e) => warn!("Failed to encode metrics delta: {}", e),
                        }
                    }
                }
            }
        })
    }
}

fn series_key(name: &str, metric: &Metric) -> String {
    let mut labels: Vec<String> = metric
        .get_label()
        .iter()
        .map(|l| format!("{}={}", l.get_name(), l.get_value()))
        .collect();
    labels.sort();
    format!("{}{{{}}}", name, labels.join(","))
}
