use async_trait::async_trait;
use batch_worker_client::TaskQueueService;
use batch_worker_core::{Result, WorkCompletion, WorkUnit, WorkerError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;

/// In-process task queue for embedding the runtime without a remote
/// orchestration service.
pub struct LocalTaskQueue {
    task_queue: String,
    units_tx: mpsc::UnboundedSender<WorkUnit>,
    units_rx: Mutex<mpsc::UnboundedReceiver<WorkUnit>>,
    completions_tx: mpsc::UnboundedSender<WorkCompletion>,
    completions_rx: Mutex<mpsc::UnboundedReceiver<WorkCompletion>>,
    pending: AtomicUsize,
}

impl LocalTaskQueue {
    pub fn new(task_queue: impl Into<String>) -> Self {
        let (units_tx, units_rx) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        LocalTaskQueue {
            task_queue: task_queue.into(),
            units_tx,
            units_rx: Mutex::new(units_rx),
            completions_tx,
            completions_rx: Mutex::new(completions_rx),
            pending: AtomicUsize::new(0),
        }
    }

    pub fn task_queue(&self) -> &str {
        &self.task_queue
    }

    pub fn submit(&self, unit: WorkUnit) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        // The receiver lives as long as `self`.
        let _ = self.units_tx.send(unit);
    }

    /// Units submitted but not yet handed to a poller
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Next reported outcome, waiting until one arrives
    pub async fn next_completion(&self) -> Option<WorkCompletion> {
        self.completions_rx.lock().await.recv().await
    }

    /// Outcomes reported so far, without waiting
    pub async fn drain_completions(&self) -> Vec<WorkCompletion> {
        let mut rx = self.completions_rx.lock().await;
        let mut completions = Vec::new();
        while let Ok(completion) = rx.try_recv() {
            completions.push(completion);
        }
        completions
    }
}

#[async_trait]
impl TaskQueueService for LocalTaskQueue {
    async fn poll_work_unit(&self, task_queue: &str, wait: Duration) -> Result<Option<WorkUnit>> {
        if task_queue != self.task_queue {
            return Err(WorkerError::transport(format!(
                "unknown task queue {}",
                task_queue
            )));
        }

        let mut rx = self.units_rx.lock().await;
        match timeout(wait, rx.recv()).await {
            Ok(Some(unit)) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                Ok(Some(unit))
            }
            Ok(None) | Err(_) => Ok(None),
        }
    }

    async fn respond_work_unit(&self, completion: WorkCompletion) -> Result<()> {
        self.completions_tx
            .send(completion)
            .map_err(|_| WorkerError::transport("local task queue closed"))
    }
}
