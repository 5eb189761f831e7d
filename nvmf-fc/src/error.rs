//! Error types for the queue-pair engine.

use sli4::types::wcqe_status;
use sli4::{EncodeError, QueueError, RqError};

/// Pool that ran dry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    RequestTag,
    Exchange,
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resource::RequestTag => write!(f, "request tag"),
            Resource::Exchange => write!(f, "exchange"),
        }
    }
}

/// The adapter reported something that does not match driver state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("completion for unknown request tag {0}")]
    UnknownRequestTag(u16),
    #[error("event for unknown CQ id {0:#06x}")]
    UnknownCqId(u16),
    #[error("unhandled CQE code {0:#04x}")]
    UnhandledCqe(u8),
}

/// Queue-pair engine errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Work queue has no free slot.
    #[error("work queue full")]
    QueueFull,
    #[error("{0} pool exhausted")]
    ResourceExhausted(Resource),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// Completion carried a non-success status.
    #[error("hardware rejected WQE: status {status:#04x}, ext status {ext_status:#x}")]
    HardwareReject { status: u8, ext_status: u32 },
    /// The port went away; nothing is posted to its queue pairs anymore.
    #[error("port is dead")]
    PortDead,
    /// The queue pair itself is not online (bring-up or reset).
    #[error("queue pair is offline")]
    Offline,
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Rq(#[from] RqError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Status a completion callback receives, surfaced verbatim from the CQE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompletionStatus {
    pub status: u8,
    pub ext_status: u32,
}

impl CompletionStatus {
    pub const SUCCESS: Self = Self {
        status: wcqe_status::SUCCESS,
        ext_status: 0,
    };

    pub fn new(status: u8, ext_status: u32) -> Self {
        Self { status, ext_status }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.status == wcqe_status::SUCCESS
    }

    pub fn into_result(self) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(Error::HardwareReject {
                status: self.status,
                ext_status: self.ext_status,
            })
        }
    }
}
