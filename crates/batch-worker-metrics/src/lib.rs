//! Metrics plumbing shared by the channel and the worker runtime.
//!
//! A [`MetricsRegistry`] handle is created once and injected into every
//! component that emits metrics. The [`MetricsPipeline`] owns the two
//! background activities reading it: the periodic delta reporter and the
//! HTTP scrape server.

pub mod pipeline;
pub mod registry;
pub mod reporter;
pub mod server;

pub use pipeline::{MetricsConfig, MetricsPipeline};
pub use registry::MetricsRegistry;
pub use reporter::{MetricsReporter, ReportSink, TracingSink};
pub use server::ScrapeServer;
