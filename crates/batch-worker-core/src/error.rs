use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid runtime state: expected {expected}, got {actual}")]
    State { expected: String, actual: String },

    #[error("No handler registered for work type: {work_type}")]
    Dispatch { work_type: String },

    #[error("Metrics port {port} is already in use")]
    PortInUse {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

impl WorkerError {
    pub fn configuration(message: impl Into<String>) -> Self {
        WorkerError::Configuration(message.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        WorkerError::Transport(message.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        WorkerError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error must abort process initialization.
    ///
    /// `Dispatch` is recovered in place by the runtime and `State` signals
    /// API misuse rather than a bad environment.
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            WorkerError::Configuration(_)
                | WorkerError::Io { .. }
                | WorkerError::Credential(_)
                | WorkerError::Transport(_)
                | WorkerError::PortInUse { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, WorkerError>;
