use thiserror::Error;

pub type ReplayResult<T> = Result<T, ReplayError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReplayError {
    #[error("capture session is already running")]
    AlreadyCapturing,
    #[error("capture source '{source_name}' failed: {reason}")]
    SourceFailure { source_name: String, reason: String },
    #[error("a flush is already in flight")]
    FlushInProgress,
    #[error("storage sink failed: {reason}")]
    SinkFailure { reason: String },
    #[error("replay window is empty, nothing to save")]
    EmptyWindow,
    #[error(
        "segment out of order: seq={sequence} at {captured_ns}ns after seq={last_sequence} at {last_captured_ns}ns"
    )]
    OutOfOrder {
        sequence: u64,
        captured_ns: u64,
        last_sequence: u64,
        last_captured_ns: u64,
    },
    #[error("window duration cannot change while capturing")]
    WindowLocked,
    #[error("window duration must be positive")]
    InvalidWindow,
}

impl ReplayError {
    pub fn source_failure(source_name: impl Into<String>, err: impl Into<anyhow::Error>) -> Self {
        Self::SourceFailure {
            source_name: source_name.into(),
            reason: format!("{:#}", err.into()),
        }
    }

    pub fn sink_failure(err: impl Into<anyhow::Error>) -> Self {
        Self::SinkFailure {
            reason: format!("{:#}", err.into()),
        }
    }

    /// Whether the caller can simply retry later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::FlushInProgress | Self::EmptyWindow)
    }
}
