use async_trait::async_trait;
use batch_worker_core::{Result, WorkCompletion, WorkUnit};
use std::time::Duration;

/// The task-queue capability the worker runtime polls and reports to.
#[async_trait]
pub trait TaskQueueService: Send + Sync {
    /// Long-poll `task_queue` for up to `wait`; `None` when nothing arrived.
    async fn poll_work_unit(&self, task_queue: &str, wait: Duration) -> Result<Option<WorkUnit>>;

    /// Report the outcome of a previously polled work unit.
    async fn respond_work_unit(&self, completion: WorkCompletion) -> Result<()>;
}
