use async_trait::async_trait;
use batch_worker_core::{Result, WorkKind, WorkerError};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Result type for work handlers: output bytes or a failure message
pub type HandlerResult = std::result::Result<Vec<u8>, String>;

/// Trait for workflow and activity implementations
#[async_trait]
pub trait WorkHandler: Send + Sync {
    /// Execute one work unit with the given input
    async fn execute(&self, input: Vec<u8>) -> HandlerResult;
}

/// Adapter turning an async closure into a [`WorkHandler`]
pub struct FnHandler<F> {
    f: F,
}

pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> WorkHandler for FnHandler<F>
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn execute(&self, input: Vec<u8>) -> HandlerResult {
        (self.f)(input).await
    }
}

/// Handlers keyed by work kind and work type name.
///
/// Populated before polling starts and only read afterwards, so the runtime
/// shares it behind a plain `Arc` without locking.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<(WorkKind, String), Arc<dyn WorkHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H: WorkHandler + 'static>(
        &mut self,
        kind: WorkKind,
        work_type: impl Into<String>,
        handler: H,
    ) -> Result<()> {
        let work_type = work_type.into();
        if work_type.trim().is_empty() {
            return Err(WorkerError::configuration(format!(
                "{} type name must not be empty",
                kind
            )));
        }

        let key = (kind, work_type);
        if self.handlers.contains_key(&key) {
            return Err(WorkerError::configuration(format!(
                "{} {} is already registered",
                key.0, key.1
            )));
        }

        self.handlers.insert(key, Arc::new(handler));
        Ok(())
    }

    /// Look up the handler for a received work unit.
    pub fn resolve(&self, kind: WorkKind, work_type: &str) -> Result<Arc<dyn WorkHandler>> {
        self.handlers
            .get(&(kind, work_type.to_string()))
            .cloned()
            .ok_or_else(|| WorkerError::Dispatch {
                work_type: format!("{} {}", kind, work_type),
            })
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered keys rendered as `kind:type`, sorted
    pub fn work_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .handlers
            .keys()
            .map(|(kind, name)| format!("{}:{}", kind, name))
            .collect();
        types.sort();
        types
    }
}

/// Sample activity that returns its input unchanged
pub struct EchoHandler;

#[async_trait]
impl WorkHandler for EchoHandler {
    async fn execute(&self, input: Vec<u8>) -> HandlerResult {
        Ok(input)
    }
}

/// Sample activity that upper-cases a UTF-8 record after a simulated delay
pub struct ProcessRecordHandler {
    delay: Duration,
}

impl ProcessRecordHandler {
    pub fn new(delay: Duration) -> Self {
        ProcessRecordHandler { delay }
    }
}

#[async_trait]
impl WorkHandler for ProcessRecordHandler {
    async fn execute(&self, input: Vec<u8>) -> HandlerResult {
        let record = String::from_utf8(input).map_err(|e| format!("Invalid record: {}", e))?;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(record.to_uppercase().into_bytes())
    }
}
