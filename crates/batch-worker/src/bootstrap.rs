use crate::config::WorkerConfig;
use batch_worker_client::{OrchestrationClient, SecureChannel, TransportSecurity};
use batch_worker_core::Result;
use batch_worker_metrics::MetricsRegistry;
use tracing::info;

/// Load credentials, open the channel and wrap it in a namespaced client.
///
/// Every failure here is startup-fatal: nothing is retried.
pub async fn connect(config: &WorkerConfig, registry: &MetricsRegistry) -> Result<OrchestrationClient> {
    let endpoint = config.endpoint()?;

    let security = TransportSecurity::load(&config.credential_paths())?;
    if security.is_none() {
        info!("No client credentials configured, connecting in cleartext");
    }

    let channel =
        SecureChannel::connect(&endpoint, security, config.channel_options(), registry).await?;

    let client = OrchestrationClient::new(channel, endpoint.namespace(), config.identity())?;
    info!(
        "Connected to {} as {} (namespace: {})",
        endpoint.target_address(),
        client.identity(),
        client.namespace()
    );
    Ok(client)
}
