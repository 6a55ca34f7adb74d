use crate::handler::{HandlerRegistry, WorkHandler};
use crate::metrics::WorkerMetrics;
use crate::rate_limit::ExecutionRateLimiter;
use batch_worker_client::{default_identity, TaskQueueService};
use batch_worker_core::{
    Result, WorkCompletion, WorkKind, WorkOutcome, WorkUnit, WorkUnitId, WorkerError,
};
use batch_worker_metrics::MetricsRegistry;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Constructed,
    Registering,
    Polling,
    Draining,
    Stopped,
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuntimeState::Constructed => "Constructed",
            RuntimeState::Registering => "Registering",
            RuntimeState::Polling => "Polling",
            RuntimeState::Draining => "Draining",
            RuntimeState::Stopped => "Stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub task_queue: String,
    pub identity: String,
    /// Process-wide ceiling on execution starts
    pub max_activities_per_second: u32,
    pub poller_count: usize,
    pub max_concurrent_executions: usize,
    /// Long-poll window per request
    pub poll_wait: Duration,
    pub poll_error_backoff: Duration,
    /// How long draining waits for in-flight executions
    pub drain_timeout: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        RuntimeOptions {
            task_queue: "BatchWorkflow".to_string(),
            identity: default_identity(),
            max_activities_per_second: 150,
            poller_count: 2,
            max_concurrent_executions: 200,
            poll_wait: Duration::from_secs(60),
            poll_error_backoff: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome of draining the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainReport {
    /// Executions still running when the drain window closed
    pub abandoned: usize,
}

/// Polls one task queue and dispatches work units to registered handlers.
///
/// Lifecycle: `Constructed → Registering → Polling → Draining → Stopped`.
/// Handlers can only be registered before [`WorkerRuntime::start`]; after
/// that the registry is frozen and shared read-only with the pollers.
pub struct WorkerRuntime {
    service: Arc<dyn TaskQueueService>,
    options: RuntimeOptions,
    limiter: Arc<ExecutionRateLimiter>,
    metrics: WorkerMetrics,
    pending: Mutex<Option<HandlerRegistry>>,
    state: watch::Sender<RuntimeState>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    pollers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerRuntime {
    pub fn new(
        service: Arc<dyn TaskQueueService>,
        options: RuntimeOptions,
        registry: &MetricsRegistry,
    ) -> Result<Self> {
        if options.task_queue.trim().is_empty() {
            return Err(WorkerError::configuration("task_queue must not be empty"));
        }
        if options.poller_count == 0 {
            return Err(WorkerError::configuration("poller_count must be greater than zero"));
        }
        if options.max_concurrent_executions == 0 {
            return Err(WorkerError::configuration(
                "max_concurrent_executions must be greater than zero",
            ));
        }

        let metrics = WorkerMetrics::register(registry)?;
        let limiter = ExecutionRateLimiter::per_second(options.max_activities_per_second)?
            .with_wait_histogram(metrics.rate_limit_wait.clone());
        let (state, _) = watch::channel(RuntimeState::Constructed);

        Ok(WorkerRuntime {
            service,
            options,
            limiter: Arc::new(limiter),
            metrics,
            pending: Mutex::new(Some(HandlerRegistry::new())),
            state,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            pollers: Mutex::new(Vec::new()),
        })
    }

    pub fn state(&self) -> RuntimeState {
        *self.state.borrow()
    }

    /// Receiver notified on every state transition
    pub fn subscribe(&self) -> watch::Receiver<RuntimeState> {
        self.state.subscribe()
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    pub fn register_workflow<H: WorkHandler + 'static>(
        &self,
        work_type: impl Into<String>,
        handler: H,
    ) -> Result<()> {
        self.register(WorkKind::Workflow, work_type, handler)
    }

    pub fn register_activity<H: WorkHandler + 'static>(
        &self,
        work_type: impl Into<String>,
        handler: H,
    ) -> Result<()> {
        self.register(WorkKind::Activity, work_type, handler)
    }

    pub fn register<H: WorkHandler + 'static>(
        &self,
        kind: WorkKind,
        work_type: impl Into<String>,
        handler: H,
    ) -> Result<()> {
        let mut pending = self.pending.lock();
        let registry = pending
            .as_mut()
            .ok_or_else(|| self.state_error("Constructed or Registering"))?;

        registry.register(kind, work_type, handler)?;
        self.state.send_replace(RuntimeState::Registering);
        Ok(())
    }

    /// Freeze the handler registry and spawn the pollers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut pending = self.pending.lock();
        let registry = pending
            .take()
            .ok_or_else(|| self.state_error("Constructed or Registering"))?;

        if registry.is_empty() {
            *pending = Some(registry);
            return Err(WorkerError::configuration(
                "at least one workflow or activity handler must be registered before start",
            ));
        }

        let handlers = Arc::new(registry);
        self.state.send_replace(RuntimeState::Polling);
        info!(
            "Polling started on queue {} ({} pollers, {} executions/s, handlers: {:?})",
            self.options.task_queue,
            self.options.poller_count,
            self.limiter.rate(),
            handlers.work_types()
        );

        // Spawned while `pending` is held so a concurrent shutdown sees every poller.
        let executions = Arc::new(Semaphore::new(self.options.max_concurrent_executions));
        let mut pollers = self.pollers.lock();
        for index in 0..self.options.poller_count {
            let poller = Poller {
                index,
                service: self.service.clone(),
                handlers: handlers.clone(),
                executions: executions.clone(),
                shutdown: self.shutdown.clone(),
                tracker: self.tracker.clone(),
                poll_wait: self.options.poll_wait,
                poll_error_backoff: self.options.poll_error_backoff,
                execution: Execution {
                    service: self.service.clone(),
                    limiter: self.limiter.clone(),
                    metrics: self.metrics.clone(),
                    task_queue: self.options.task_queue.clone(),
                    identity: self.options.identity.clone(),
                },
            };
            pollers.push(tokio::spawn(poller.run()));
        }

        Ok(())
    }

    /// Stop polling and wait for in-flight executions to finish.
    ///
    /// Executions still running after `drain_timeout` are left to finish on
    /// their own and counted in the report. Calling this again after the
    /// runtime stopped returns immediately.
    pub async fn shutdown(&self) -> DrainReport {
        {
            let mut pending = self.pending.lock();
            match self.state() {
                RuntimeState::Draining | RuntimeState::Stopped => return DrainReport::default(),
                _ => {}
            }
            *pending = None;
            self.state.send_replace(RuntimeState::Draining);
        }

        info!("Draining: no new work will be accepted");
        self.shutdown.cancel();

        let pollers = std::mem::take(&mut *self.pollers.lock());
        for poller in pollers {
            if let Err(e) = poller.await {
                error!("Poller task failed: {}", e);
            }
        }

        self.tracker.close();
        let in_flight = self.tracker.len();
        if in_flight > 0 {
            info!("Waiting for {} in-flight executions to complete", in_flight);
        }

        let report = match tokio::time::timeout(self.options.drain_timeout, self.tracker.wait()).await
        {
            Ok(()) => DrainReport::default(),
            Err(_) => {
                let abandoned = self.tracker.len();
                warn!(
                    "Drain window of {:?} elapsed with {} executions still running",
                    self.options.drain_timeout, abandoned
                );
                DrainReport { abandoned }
            }
        };

        self.state.send_replace(RuntimeState::Stopped);
        info!("Worker runtime stopped");
        report
    }

    fn state_error(&self, expected: &str) -> WorkerError {
        WorkerError::State {
            expected: expected.to_string(),
            actual: self.state().to_string(),
        }
    }
}

impl Drop for WorkerRuntime {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct Poller {
    index: usize,
    service: Arc<dyn TaskQueueService>,
    handlers: Arc<HandlerRegistry>,
    executions: Arc<Semaphore>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    poll_wait: Duration,
    poll_error_backoff: Duration,
    execution: Execution,
}

impl Poller {
    async fn run(self) {
        debug!("Poller {} started", self.index);

        loop {
            // Reserve execution capacity before asking for work.
            let permit = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                permit = self.executions.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let polled = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                polled = self.service.poll_work_unit(&self.execution.task_queue, self.poll_wait) => polled,
            };

            match polled {
                Ok(Some(unit)) => self.dispatch(unit, permit),
                Ok(None) => {}
                Err(e) => {
                    error!("Poller {} failed to poll: {}", self.index, e);
                    self.execution.metrics.poll_errors.inc();
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_error_backoff) => {}
                    }
                }
            }
        }

        debug!("Poller {} stopped", self.index);
    }

    fn dispatch(&self, unit: WorkUnit, permit: OwnedSemaphorePermit) {
        self.execution
            .metrics
            .units_received
            .with_label_values(&[unit.kind.as_str()])
            .inc();

        let execution = self.execution.clone();
        match self.handlers.resolve(unit.kind, &unit.work_type) {
            Ok(handler) => {
                self.tracker.spawn(async move {
                    execution.run(unit, handler).await;
                    drop(permit);
                });
            }
            Err(e) => {
                warn!("Work unit {} rejected: {}", unit.id, e);
                execution
                    .metrics
                    .dispatch_errors
                    .with_label_values(&[unit.kind.as_str()])
                    .inc();
                self.tracker.spawn(async move {
                    execution.report(unit.id, WorkOutcome::Failed(e.to_string())).await;
                    drop(permit);
                });
            }
        }
    }
}

#[derive(Clone)]
struct Execution {
    service: Arc<dyn TaskQueueService>,
    limiter: Arc<ExecutionRateLimiter>,
    metrics: WorkerMetrics,
    task_queue: String,
    identity: String,
}

impl Execution {
    async fn run(&self, unit: WorkUnit, handler: Arc<dyn WorkHandler>) {
        self.limiter.admit().await;

        let labels = [unit.kind.as_str(), unit.work_type.as_str()];
        self.metrics.executions_started.with_label_values(&labels).inc();
        self.metrics.in_flight.inc();
        let timer = self.metrics.execution_latency.with_label_values(&labels).start_timer();

        debug!("Executing {} {} ({})", unit.kind, unit.work_type, unit.id);

        // Run on its own task so a panicking handler becomes a failed outcome.
        let input = unit.input;
        let result = tokio::spawn(async move { handler.execute(input).await }).await;

        let outcome = match result {
            Ok(Ok(output)) => WorkOutcome::Completed(output),
            Ok(Err(message)) => {
                warn!("{} {} failed: {}", unit.kind, unit.work_type, message);
                WorkOutcome::Failed(message)
            }
            Err(e) if e.is_panic() => {
                error!("{} {} panicked", unit.kind, unit.work_type);
                WorkOutcome::Failed("handler panicked during execution".to_string())
            }
            Err(_) => WorkOutcome::Failed("handler was cancelled".to_string()),
        };

        timer.observe_duration();
        self.metrics.in_flight.dec();
        self.metrics
            .executions_completed
            .with_label_values(&[labels[0], labels[1], outcome.as_str()])
            .inc();

        self.report(unit.id, outcome).await;
    }

    async fn report(&self, id: WorkUnitId, outcome: WorkOutcome) {
        let completion = WorkCompletion::new(id, &self.task_queue, &self.identity, outcome);
        if let Err(e) = self.service.respond_work_unit(completion).await {
            error!("Failed to report outcome of work unit {}: {}", id, e);
            self.metrics.respond_errors.inc();
        }
    }
}
