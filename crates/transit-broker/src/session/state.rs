//! Session lifecycle state machine.
//!
//! ```text
//! Connecting ──► Ready ──► Closing ──► Closed
//!     │            │                     ▲
//!     │            └──── remote close ───┘
//!     ├──► Closing (local close before ready)
//!     └──► Failed
//! ```
//!
//! Every change goes through [`SessionMachine::apply`]; anything not in the
//! table is rejected with a [`TransitionError`].

use std::fmt;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Ready,
    Closing,
    Closed,
    Failed,
}

impl SessionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who ended the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseInitiator {
    Local,
    Remote,
    Failure,
}

/// Code and reason recorded on the first transition out of a live state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u32,
    pub reason: String,
    pub initiator: CloseInitiator,
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The engine reported the session established.
    EngineReady,
    /// The creation resolver fired with success.
    CreationSucceeded,
    /// Bind, connect or retarget failed while connecting.
    CreationFailed,
    /// The engine reported the session closed.
    RemoteClosed { code: u32, reason: String },
    /// The control plane asked to close.
    LocalClose { code: u32, reason: String },
    /// The engine has been told to close.
    CloseIssued,
}

impl SessionEvent {
    const fn name(&self) -> &'static str {
        match self {
            Self::EngineReady => "engine-ready",
            Self::CreationSucceeded => "creation-succeeded",
            Self::CreationFailed => "creation-failed",
            Self::RemoteClosed { .. } => "remote-closed",
            Self::LocalClose { .. } => "local-close",
            Self::CloseIssued => "close-issued",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal session transition: {event} while {from}")]
pub struct TransitionError {
    pub from: SessionState,
    pub event: &'static str,
}

/// Explicit session state machine.
#[derive(Debug, Clone)]
pub struct SessionMachine {
    state: SessionState,
    engine_ready: bool,
    close: Option<CloseInfo>,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMachine {
    pub const fn new() -> Self {
        Self {
            state: SessionState::Connecting,
            engine_ready: false,
            close: None,
        }
    }

    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the engine has reported readiness.
    pub const fn engine_ready(&self) -> bool {
        self.engine_ready
    }

    pub const fn close_info(&self) -> Option<&CloseInfo> {
        self.close.as_ref()
    }

    /// Apply `event`, returning the new state.
    pub fn apply(&mut self, event: SessionEvent) -> Result<SessionState, TransitionError> {
        use SessionEvent as E;
        use SessionState as S;

        let next = match (self.state, &event) {
            (S::Connecting, E::EngineReady) if !self.engine_ready => {
                self.engine_ready = true;
                S::Connecting
            }
            (S::Connecting, E::CreationSucceeded) if self.engine_ready => S::Ready,
            (S::Connecting, E::CreationFailed) => {
                self.record_close(0, String::new(), CloseInitiator::Failure);
                S::Failed
            }
            // After engine readiness a remote close has to wait for the
            // creation resolver, so it is only legal before it.
            (S::Connecting, E::RemoteClosed { code, reason }) if !self.engine_ready => {
                self.record_close(*code, reason.clone(), CloseInitiator::Failure);
                S::Failed
            }
            (S::Ready, E::RemoteClosed { code, reason }) => {
                self.record_close(*code, reason.clone(), CloseInitiator::Remote);
                S::Closed
            }
            (S::Connecting | S::Ready, E::LocalClose { code, reason }) => {
                self.record_close(*code, reason.clone(), CloseInitiator::Local);
                S::Closing
            }
            (S::Closing, E::CloseIssued) => S::Closed,
            (from, event) => {
                return Err(TransitionError {
                    from,
                    event: event.name(),
                });
            }
        };

        self.state = next;
        Ok(next)
    }

    fn record_close(&mut self, code: u32, reason: String, initiator: CloseInitiator) {
        if self.close.is_none() {
            self.close = Some(CloseInfo {
                code,
                reason,
                initiator,
            });
        }
    }
}
