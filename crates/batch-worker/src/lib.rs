pub mod bootstrap;
pub mod config;
pub mod handler;
pub mod local;
pub mod metrics;
pub mod rate_limit;
pub mod runtime;
pub mod worker;

pub use config::{MetricsSettings, WorkerConfig};
pub use handler::{handler_fn, HandlerRegistry, HandlerResult, WorkHandler};
pub use local::LocalTaskQueue;
pub use rate_limit::ExecutionRateLimiter;
pub use runtime::{DrainReport, RuntimeOptions, RuntimeState, WorkerRuntime};
pub use worker::Worker;
