mod channel;
mod client;
mod credentials;
mod metrics;
mod service;

pub use channel::{ChannelOptions, SecureChannel};
pub use client::{default_identity, OrchestrationClient};
pub use credentials::{CredentialPaths, TransportSecurity};
pub use metrics::ChannelMetrics;
pub use service::TaskQueueService;
