//! Relay module types.

use std::io;

use tokio::task::JoinHandle;

/// Which way a relay copies bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayDirection {
    /// Native stream -> pipe sender.
    Inbound,
    /// Pipe receiver -> native stream.
    Outbound,
}

impl RelayDirection {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// Handle to a running copy task.
///
/// Dropping the handle detaches the task; the copy keeps running until
/// either side finishes or the relay is shut down.
#[derive(Debug)]
pub struct RelayHandle {
    pub(crate) direction: RelayDirection,
    pub(crate) task: JoinHandle<io::Result<u64>>,
}

impl RelayHandle {
    pub const fn direction(&self) -> RelayDirection {
        self.direction
    }

    /// Stop the copy immediately.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Wait for the copy to finish, returning the number of bytes moved.
    pub async fn finished(self) -> Result<u64, RelayError> {
        match self.task.await {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(e)) => Err(RelayError::Io(e.to_string())),
            Err(e) if e.is_cancelled() => Err(RelayError::Aborted),
            Err(e) => Err(RelayError::Io(e.to_string())),
        }
    }
}

/// Errors from pipe creation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipeError {
    #[error("Invalid pipe capacity: {0}")]
    InvalidCapacity(usize),

    #[error("Pipe allocation failed: {0}")]
    Allocation(String),
}

/// Errors from relay operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("Relay is shut down")]
    ShutDown,

    #[error("No async runtime available to run the relay")]
    NoRuntime,

    #[error("Relay aborted")]
    Aborted,

    #[error("Relay I/O error: {0}")]
    Io(String),
}
