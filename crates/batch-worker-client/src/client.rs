use crate::channel::SecureChannel;
use crate::service::TaskQueueService;
use async_trait::async_trait;
use batch_worker_core::{Result, WorkCompletion, WorkUnit, WorkerError};
use batch_worker_protocol::{Message, PollWorkUnitRequest, RespondWorkUnitRequest};
use std::sync::Arc;
use std::time::Duration;

/// Extra time allowed past the server-side poll wait before giving up
const DEFAULT_POLL_SLACK: Duration = Duration::from_secs(5);

/// Default worker identity: `<pid>@<hostname>`
pub fn default_identity() -> String {
    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    format!("{}@{}", std::process::id(), hostname)
}

/// Channel handle scoped to one namespace
#[derive(Clone)]
pub struct OrchestrationClient {
    channel: Arc<SecureChannel>,
    namespace: String,
    identity: String,
    poll_slack: Duration,
}

impl OrchestrationClient {
    pub fn new(
        channel: SecureChannel,
        namespace: impl Into<String>,
        identity: impl Into<String>,
    ) -> Result<Self> {
        let namespace = namespace.into();
        let identity = identity.into();

        if namespace.trim().is_empty() {
            return Err(WorkerError::configuration("namespace must not be empty"));
        }
        if identity.trim().is_empty() {
            return Err(WorkerError::configuration("worker identity must not be empty"));
        }

        Ok(OrchestrationClient {
            channel: Arc::new(channel),
            namespace,
            identity,
            poll_slack: DEFAULT_POLL_SLACK,
        })
    }

    /// Override how long a poll may outlive its requested wait.
    pub fn with_poll_slack(mut self, slack: Duration) -> Self {
        self.poll_slack = slack;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn channel(&self) -> &SecureChannel {
        &self.channel
    }
}

#[async_trait]
impl TaskQueueService for OrchestrationClient {
    async fn poll_work_unit(&self, task_queue: &str, wait: Duration) -> Result<Option<WorkUnit>> {
        let request = Message::PollWorkUnit(PollWorkUnitRequest {
            namespace: self.namespace.clone(),
            task_queue: task_queue.to_string(),
            identity: self.identity.clone(),
            wait_millis: wait.as_millis() as u64,
        });

        let response = self
            .channel
            .call("poll_work_unit", request, Some(wait + self.poll_slack))
            .await?;

        match response {
            Message::Ack(ack) => Ok(ack.work_unit),
            other => Err(WorkerError::transport(format!(
                "unexpected response to poll: {:?}",
                other.message_type()
            ))),
        }
    }

    async fn respond_work_unit(&self, completion: WorkCompletion) -> Result<()> {
        let request = Message::RespondWorkUnit(RespondWorkUnitRequest {
            namespace: self.namespace.clone(),
            completion,
        });

        match self.channel.call("respond_work_unit", request, None).await? {
            Message::Ack(_) => Ok(()),
            other => Err(WorkerError::transport(format!(
                "unexpected response to completion: {:?}",
                other.message_type()
            ))),
        }
    }
}
