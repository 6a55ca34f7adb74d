use crate::{Result, WorkerError};
use serde::{Deserialize, Serialize};

/// Where the worker connects and which queue it serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    target_address: String,
    namespace: String,
    task_queue: String,
}

impl EndpointDescriptor {
    pub fn new(
        target_address: impl Into<String>,
        namespace: impl Into<String>,
        task_queue: impl Into<String>,
    ) -> Result<Self> {
        let descriptor = EndpointDescriptor {
            target_address: target_address.into(),
            namespace: namespace.into(),
            task_queue: task_queue.into(),
        };

        for (field, value) in [
            ("target_address", &descriptor.target_address),
            ("namespace", &descriptor.namespace),
            ("task_queue", &descriptor.task_queue),
        ] {
            if value.trim().is_empty() {
                return Err(WorkerError::configuration(format!("{} must not be empty", field)));
            }
        }

        Ok(descriptor)
    }

    pub fn target_address(&self) -> &str {
        &self.target_address
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn task_queue(&self) -> &str {
        &self.task_queue
    }

    /// Host part of the target address, used as the default TLS server name.
    pub fn host(&self) -> &str {
        let address = self
            .target_address
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.target_address);

        if let Some(rest) = address.strip_prefix('[') {
            return rest.split(']').next().unwrap_or(rest);
        }

        match address.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
            _ => address,
        }
    }
}
