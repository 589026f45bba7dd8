//! Control-plane facing types.
//!
//! Requests arrive as method calls on [`SessionBroker`](crate::SessionBroker);
//! responses go through resolvers; unsolicited events are pushed as
//! [`Notification`]s on the [`ControlChannel`] bound at session creation.

use std::time::SystemTime;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{BrokerError, BrokerResult};
use crate::relay::{PipeReceiver, PipeSender};
use crate::session::{Principal, ReliabilityMode, SessionOptions};

/// Unsolicited events pushed to the control plane.
#[derive(Debug)]
pub enum Notification {
    /// The peer closed the session.
    RemoteClosed {
        clean: bool,
        code: u32,
        reason: String,
    },
    /// Peer-initiated send-only stream; read from the receiver.
    IncomingUnidirectionalStream(PipeReceiver),
    /// Peer-initiated bidirectional stream.
    IncomingBidirectionalStream(BidirectionalPipes),
    IncomingDatagram {
        payload: Bytes,
        received_at: SystemTime,
    },
}

impl Notification {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RemoteClosed { .. } => "remote-closed",
            Self::IncomingUnidirectionalStream(_) => "incoming-unidirectional-stream",
            Self::IncomingBidirectionalStream(_) => "incoming-bidirectional-stream",
            Self::IncomingDatagram { .. } => "incoming-datagram",
        }
    }
}

/// Control-plane endpoints of a bidirectional stream.
#[derive(Debug)]
pub struct BidirectionalPipes {
    /// Bytes arriving from the peer.
    pub receiver: PipeReceiver,
    /// Bytes to send to the peer.
    pub sender: PipeSender,
}

/// Channel carrying [`Notification`]s to the control plane.
#[derive(Debug, Clone)]
pub struct ControlChannel {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ControlChannel {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Whether the control plane is still listening.
    pub fn is_valid(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Push a notification; returns `false` when the control plane is gone.
    pub(crate) fn notify(&self, notification: Notification) -> bool {
        self.tx.send(notification).is_ok()
    }
}

/// Session creation parameters.
#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    pub url: String,
    pub principal: Principal,
    pub options: SessionOptions,
    pub control: ControlChannel,
}

/// Wire-level answer to a session creation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSessionResponse {
    pub result: Result<(), BrokerError>,
    pub reliability: ReliabilityMode,
}

impl From<BrokerResult<ReliabilityMode>> for CreateSessionResponse {
    fn from(result: BrokerResult<ReliabilityMode>) -> Self {
        match result {
            Ok(reliability) => Self {
                result: Ok(()),
                reliability,
            },
            Err(e) => Self {
                result: Err(e),
                reliability: ReliabilityMode::Pending,
            },
        }
    }
}
