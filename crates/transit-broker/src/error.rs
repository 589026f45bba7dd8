//! Broker error types.

use crate::engine::EngineError;
use crate::relay::{PipeError, RelayError};

/// Result type alias using [`BrokerError`].
pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

/// Errors reported to the control plane through resolvers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("WebTransport sessions are disabled")]
    FeatureDisabled,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Connect failure: {0}")]
    ConnectFailure(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Failure: {0}")]
    GenericFailure(String),

    #[error("Session closed by remote (code {code}): {reason}")]
    RemoteClosed { code: u32, reason: String },
}

/// Copyable discriminant of [`BrokerError`], convenient for matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    FeatureDisabled,
    InvalidArgument,
    ConnectFailure,
    InvalidState,
    GenericFailure,
    RemoteClosed,
}

impl BrokerError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::FeatureDisabled => ErrorKind::FeatureDisabled,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::ConnectFailure(_) => ErrorKind::ConnectFailure,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::GenericFailure(_) => ErrorKind::GenericFailure,
            Self::RemoteClosed { .. } => ErrorKind::RemoteClosed,
        }
    }
}

impl From<EngineError> for BrokerError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidState => Self::InvalidState(err.to_string()),
            EngineError::Failure(msg) => Self::GenericFailure(msg),
        }
    }
}

impl From<PipeError> for BrokerError {
    fn from(err: PipeError) -> Self {
        Self::GenericFailure(err.to_string())
    }
}

impl From<RelayError> for BrokerError {
    fn from(err: RelayError) -> Self {
        Self::GenericFailure(err.to_string())
    }
}
