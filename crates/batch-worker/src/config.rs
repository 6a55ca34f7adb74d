use crate::runtime::RuntimeOptions;
use batch_worker_client::{default_identity, ChannelOptions, CredentialPaths};
use batch_worker_core::{EndpointDescriptor, Result, WorkerError};
use batch_worker_metrics::MetricsConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

pub const ENV_ADDRESS: &str = "BATCH_WORKER_ADDRESS";
pub const ENV_NAMESPACE: &str = "BATCH_WORKER_NAMESPACE";
pub const ENV_TASK_QUEUE: &str = "BATCH_WORKER_TASK_QUEUE";
pub const ENV_CERT_PATH: &str = "BATCH_WORKER_CERT_PATH";
pub const ENV_KEY_PATH: &str = "BATCH_WORKER_KEY_PATH";
pub const ENV_CA_CERT_PATH: &str = "BATCH_WORKER_CA_CERT_PATH";

/// Names used by existing deployments; the `BATCH_WORKER_*` forms take precedence.
pub const ENV_LEGACY_ADDRESS: &str = "TEMPORAL_ADDRESS";
pub const ENV_LEGACY_NAMESPACE: &str = "TEMPORAL_NAMESPACE";
pub const ENV_LEGACY_TASK_QUEUE: &str = "TEMPORAL_BATCHPROCESSING_TASKQUEUE";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub target_address: String,
    pub namespace: String,
    pub task_queue: String,
    /// Empty together with `client_key_path` to disable mutual TLS
    pub client_cert_path: String,
    pub client_key_path: String,
    pub server_ca_cert_path: Option<String>,
    pub server_name: Option<String>,
    pub identity: Option<String>,
    pub max_activities_per_second: u32,
    pub poller_count: usize,
    pub max_concurrent_executions: usize,
    pub poll_wait_secs: u64,
    pub connect_timeout_secs: u64,
    pub graceful_shutdown_timeout_secs: u64,
    pub metrics: MetricsSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub port: u16,
    pub path: String,
    pub report_interval_ms: u64,
    pub shutdown_grace_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            target_address: "localhost:7233".to_string(),
            namespace: "default".to_string(),
            task_queue: "BatchWorkflow".to_string(),
            client_cert_path: String::new(),
            client_key_path: String::new(),
            server_ca_cert_path: None,
            server_name: None,
            identity: None,
            max_activities_per_second: 150,
            poller_count: 2,
            max_concurrent_executions: 200,
            poll_wait_secs: 60,
            connect_timeout_secs: 10,
            graceful_shutdown_timeout_secs: 30,
            metrics: MetricsSettings::default(),
        }
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        MetricsSettings {
            port: 8085,
            path: "/metrics".to_string(),
            report_interval_ms: 1000,
            shutdown_grace_ms: 1000,
        }
    }
}

impl WorkerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| WorkerError::io(path, e))?;
        serde_yaml::from_str(&contents).map_err(|e| {
            WorkerError::configuration(format!("invalid config file {}: {}", path.display(), e))
        })
    }

    /// Override fields from the `BATCH_WORKER_*` environment variables and
    /// their legacy `TEMPORAL_*` aliases.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup(ENV_LEGACY_ADDRESS) {
            self.target_address = value;
        }
        if let Some(value) = lookup(ENV_LEGACY_NAMESPACE) {
            self.namespace = value;
        }
        if let Some(value) = lookup(ENV_LEGACY_TASK_QUEUE) {
            self.task_queue = value;
        }

        if let Some(value) = lookup(ENV_ADDRESS) {
            self.target_address = value;
        }
        if let Some(value) = lookup(ENV_NAMESPACE) {
            self.namespace = value;
        }
        if let Some(value) = lookup(ENV_TASK_QUEUE) {
            self.task_queue = value;
        }
        if let Some(value) = lookup(ENV_CERT_PATH) {
            self.client_cert_path = value;
        }
        if let Some(value) = lookup(ENV_KEY_PATH) {
            self.client_key_path = value;
        }
        if let Some(value) = lookup(ENV_CA_CERT_PATH) {
            self.server_ca_cert_path = Some(value).filter(|v| !v.is_empty());
        }
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("target_address", &self.target_address),
            ("namespace", &self.namespace),
            ("task_queue", &self.task_queue),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(WorkerError::configuration(format!("{} must not be empty", field)));
            }
        }

        let counts = [
            ("max_activities_per_second", self.max_activities_per_second as u64),
            ("poller_count", self.poller_count as u64),
            ("max_concurrent_executions", self.max_concurrent_executions as u64),
            ("poll_wait_secs", self.poll_wait_secs),
            ("metrics.report_interval_ms", self.metrics.report_interval_ms),
        ];
        for (field, value) in counts {
            if value == 0 {
                return Err(WorkerError::configuration(format!("{} must be greater than zero", field)));
            }
        }

        if self.client_cert_path.is_empty() != self.client_key_path.is_empty() {
            return Err(WorkerError::configuration(
                "client_cert_path and client_key_path must be set together",
            ));
        }

        if !self.metrics.path.starts_with('/') {
            return Err(WorkerError::configuration(format!(
                "metrics.path must start with '/', got {:?}",
                self.metrics.path
            )));
        }

        Ok(())
    }

    pub fn endpoint(&self) -> Result<EndpointDescriptor> {
        EndpointDescriptor::new(&self.target_address, &self.namespace, &self.task_queue)
    }

    pub fn credential_paths(&self) -> CredentialPaths {
        let paths = CredentialPaths::new(&self.client_cert_path, &self.client_key_path);
        match &self.server_ca_cert_path {
            Some(ca) => paths.with_server_ca(ca),
            None => paths,
        }
    }

    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            server_name: self.server_name.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }

    pub fn identity(&self) -> String {
        self.identity.clone().unwrap_or_else(default_identity)
    }

    pub fn runtime_options(&self) -> RuntimeOptions {
        RuntimeOptions {
            task_queue: self.task_queue.clone(),
            identity: self.identity(),
            max_activities_per_second: self.max_activities_per_second,
            poller_count: self.poller_count,
            max_concurrent_executions: self.max_concurrent_executions,
            poll_wait: Duration::from_secs(self.poll_wait_secs),
            drain_timeout: Duration::from_secs(self.graceful_shutdown_timeout_secs),
            ..RuntimeOptions::default()
        }
    }

    pub fn metrics_config(&self) -> MetricsConfig {
        MetricsConfig {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], self.metrics.port)),
            path: self.metrics.path.clone(),
            report_interval: Duration::from_millis(self.metrics.report_interval_ms),
            shutdown_grace: Duration::from_millis(self.metrics.shutdown_grace_ms),
        }
    }
}
