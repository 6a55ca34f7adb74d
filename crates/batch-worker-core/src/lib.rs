mod endpoint;
mod error;
mod work;

pub use endpoint::EndpointDescriptor;
pub use error::{Result, WorkerError};
pub use work::{WorkCompletion, WorkKind, WorkOutcome, WorkUnit, WorkUnitId};

pub const MAX_PAYLOAD_SIZE: usize = 10 * 1024 * 1024; // 10MB
