use batch_worker_core::{WorkCompletion, WorkUnit};
use serde::{Deserialize, Serialize};

/// Message types carried on the worker channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    PollWorkUnit = 1,
    RespondWorkUnit = 2,
    Ack = 3,
    Nack = 4,
    Heartbeat = 5,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MessageType::PollWorkUnit),
            2 => Some(MessageType::RespondWorkUnit),
            3 => Some(MessageType::Ack),
            4 => Some(MessageType::Nack),
            5 => Some(MessageType::Heartbeat),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Long-poll a task queue for the next work unit
    PollWorkUnit(PollWorkUnitRequest),

    /// Report the outcome of a work unit
    RespondWorkUnit(RespondWorkUnitRequest),

    /// Positive acknowledgment
    Ack(AckResponse),

    /// Negative acknowledgment
    Nack(NackResponse),

    /// Liveness check, answered with `Ack`
    Heartbeat(HeartbeatRequest),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::PollWorkUnit(_) => MessageType::PollWorkUnit,
            Message::RespondWorkUnit(_) => MessageType::RespondWorkUnit,
            Message::Ack(_) => MessageType::Ack,
            Message::Nack(_) => MessageType::Nack,
            Message::Heartbeat(_) => MessageType::Heartbeat,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollWorkUnitRequest {
    pub namespace: String,
    pub task_queue: String,
    pub identity: String,
    /// How long the server may hold the poll open before answering empty
    pub wait_millis: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RespondWorkUnitRequest {
    pub namespace: String,
    pub completion: WorkCompletion,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    /// Work unit returned for a poll; `None` when the poll expired empty
    pub work_unit: Option<WorkUnit>,
    pub message: Option<String>,
}

impl AckResponse {
    pub fn empty() -> Self {
        AckResponse {
            work_unit: None,
            message: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NackResponse {
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub namespace: String,
}
