use std::time::Duration;

use gpspod_frame::{FrameError, Opcode};
use gpspod_transport::TransportError;

/// Errors that can occur while talking to the pod.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// Frame-level error while encoding a request.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Received bytes did not decode into a reply.
    #[error("malformed reply: {0}")]
    Malformed(FrameError),

    /// No complete reply arrived in time.
    #[error("reply timed out after {0:?}")]
    Timeout(Duration),

    /// `write` and `read` were not called in strict alternation.
    #[error("out of order: {0}")]
    OutOfOrder(&'static str),

    /// A reply of another kind than the request calls for.
    #[error("unexpected reply to {expected}: {got}")]
    UnexpectedReply { expected: Opcode, got: String },

    /// An outgoing packet differs from the recorded one.
    #[error("replay mismatch at recorded entry {index}")]
    ReplayMismatch { index: usize },

    /// Offline traffic ran out.
    #[error("recorded session exhausted")]
    ReplayExhausted,

    /// The session log file is malformed.
    #[error("invalid session log: {0}")]
    SessionLog(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Session log file I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TransportError> for LinkError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Diverged { index } => Self::ReplayMismatch { index },
            TransportError::Exhausted => Self::ReplayExhausted,
            other => Self::Transport(other),
        }
    }
}

impl LinkError {
    /// A corrupted or truncated reply that a fresh request may cure.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
