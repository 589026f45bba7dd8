//! Transport engine seam.
//!
//! The broker never speaks QUIC itself. It drives a [`TransportEngine`] from
//! the Engine Context and receives the engine's callbacks through a
//! [`SessionEventListener`]. Outgoing stream requests hand the engine a
//! one-shot [`StreamCallback`].

mod listener;
pub mod loopback;

use std::fmt;
use std::time::Instant;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::session::{Principal, SessionOptions, SessionTarget};

pub use listener::{SessionEventListener, StreamCallback};
pub use loopback::LoopbackEngine;

/// Engine-owned readable stream.
pub type NativeReader = Box<dyn AsyncRead + Send + Unpin>;
/// Engine-owned writable stream.
pub type NativeWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Both halves of an engine bidirectional stream.
pub struct BidirectionalStream {
    pub reader: NativeReader,
    pub writer: NativeWriter,
}

impl fmt::Debug for BidirectionalStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BidirectionalStream").finish_non_exhaustive()
    }
}

/// Stream handed to a [`StreamCallback`] when an outgoing stream opens.
pub enum NativeStream {
    /// Send-only stream.
    Unidirectional(NativeWriter),
    Bidirectional(BidirectionalStream),
}

impl fmt::Debug for NativeStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unidirectional(_) => f.write_str("NativeStream::Unidirectional"),
            Self::Bidirectional(_) => f.write_str("NativeStream::Bidirectional"),
        }
    }
}

/// Errors reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("operation is invalid in the current session state")]
    InvalidState,

    #[error("{0}")]
    Failure(String),
}

/// Outcome the engine reports for an outgoing datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramOutcome {
    Sent,
    TooLarge,
    Dropped,
}

impl DatagramOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::TooLarge => "too-large",
            Self::Dropped => "dropped",
        }
    }
}

/// Security flags passed with a connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectFlags {
    /// Allow a cross-origin load from a null security context.
    pub allow_cross_origin_null_context: bool,
}

impl Default for ConnectFlags {
    fn default() -> Self {
        Self {
            allow_cross_origin_null_context: true,
        }
    }
}

/// Everything the engine needs to open a session.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub target: SessionTarget,
    pub principal: Principal,
    pub options: SessionOptions,
    pub flags: ConnectFlags,
}

/// Description of the serial context the engine is retargeted to.
#[derive(Debug, Clone)]
pub struct ContextTarget {
    pub name: &'static str,
    pub runtime: tokio::runtime::Handle,
}

/// Returned when the engine refuses a stream request synchronously; the
/// callback comes back so the broker can fail it.
#[derive(Debug)]
pub struct StreamRefused {
    pub error: EngineError,
    pub callback: StreamCallback,
}

/// Native WebTransport engine.
///
/// Every method is called from the Engine Context. The engine reports
/// asynchronous results through the listener given to `async_connect` and
/// through stream callbacks.
pub trait TransportEngine: Send + 'static {
    /// Start connecting; the result arrives as `session_ready` or
    /// `session_closed` on `listener`.
    fn async_connect(
        &mut self,
        request: ConnectRequest,
        listener: SessionEventListener,
    ) -> Result<(), EngineError>;

    /// Move all further session traffic onto `target`.
    fn retarget_to(&mut self, target: &ContextTarget) -> Result<(), EngineError>;

    fn create_outgoing_unidirectional_stream(
        &mut self,
        send_order: Option<i64>,
        callback: StreamCallback,
    ) -> Result<(), StreamRefused>;

    fn create_outgoing_bidirectional_stream(
        &mut self,
        send_order: Option<i64>,
        callback: StreamCallback,
    ) -> Result<(), StreamRefused>;

    /// Queue a datagram; the outcome arrives as `outgoing_datagram_outcome`
    /// for `id`.
    fn send_datagram(
        &mut self,
        payload: Bytes,
        expiration: Option<Instant>,
        id: u64,
    ) -> Result<(), EngineError>;

    fn close_session(&mut self, code: u32, reason: &str);
}
