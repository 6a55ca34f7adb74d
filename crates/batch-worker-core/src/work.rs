use crate::{Result, WorkerError, MAX_PAYLOAD_SIZE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a work unit
pub type WorkUnitId = Uuid;

/// Whether a unit of work drives a workflow or invokes an activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkKind {
    Workflow,
    Activity,
}

impl WorkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkKind::Workflow => "workflow",
            WorkKind::Activity => "activity",
        }
    }
}

impl fmt::Display for WorkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One schedulable item handed to the worker by the task queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkUnit {
    pub id: WorkUnitId,

    pub kind: WorkKind,

    /// Work type name (e.g., "BatchParentWorkflow", "ProcessRecord")
    pub work_type: String,

    /// Opaque input, max 10MB
    pub input: Vec<u8>,

    /// Delivery attempt, starting at 1
    pub attempt: u32,

    pub scheduled_at: DateTime<Utc>,
}

impl WorkUnit {
    pub fn new(kind: WorkKind, work_type: impl Into<String>, input: Vec<u8>) -> Result<Self> {
        if input.len() > MAX_PAYLOAD_SIZE {
            return Err(WorkerError::configuration(format!(
                "work unit input of {} bytes exceeds maximum of {} bytes",
                input.len(),
                MAX_PAYLOAD_SIZE
            )));
        }

        Ok(WorkUnit {
            id: Uuid::new_v4(),
            kind,
            work_type: work_type.into(),
            input,
            attempt: 1,
            scheduled_at: Utc::now(),
        })
    }

    pub fn activity(work_type: impl Into<String>, input: Vec<u8>) -> Result<Self> {
        Self::new(WorkKind::Activity, work_type, input)
    }

    pub fn workflow(work_type: impl Into<String>, input: Vec<u8>) -> Result<Self> {
        Self::new(WorkKind::Workflow, work_type, input)
    }
}

/// Result of running a work unit, as reported back upstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkOutcome {
    Completed(Vec<u8>),
    Failed(String),
}

impl WorkOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, WorkOutcome::Completed(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkOutcome::Completed(_) => "completed",
            WorkOutcome::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkCompletion {
    pub work_unit_id: WorkUnitId,
    pub task_queue: String,
    pub identity: String,
    pub outcome: WorkOutcome,
    pub completed_at: DateTime<Utc>,
}

impl WorkCompletion {
    pub fn new(
        work_unit_id: WorkUnitId,
        task_queue: impl Into<String>,
        identity: impl Into<String>,
        outcome: WorkOutcome,
    ) -> Self {
        WorkCompletion {
            work_unit_id,
            task_queue: task_queue.into(),
            identity: identity.into(),
            outcome,
            completed_at: Utc::now(),
        }
    }
}
