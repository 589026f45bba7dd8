//! Callback objects handed to the engine.
//!
//! Both types only post messages onto the Engine Context queue. They hold a
//! weak sender so an engine that keeps them around never keeps the broker's
//! contexts alive, and the listener can be severed explicitly on shutdown.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc::{UnboundedSender, WeakUnboundedSender};
use tracing::debug;

use super::{BidirectionalStream, DatagramOutcome, EngineError, NativeReader, NativeStream};
use crate::broker::SHUT_DOWN;
use crate::broker::context::{EngineCommand, EngineEvent};
use crate::broker::stream::StreamRequest;
use crate::error::BrokerError;
use crate::session::StreamDirection;

/// Failure reported when the engine drops a callback without using it.
pub(crate) const CALLBACK_DROPPED: &str = "stream request dropped by the engine";

/// Session event sink the engine reports to.
#[derive(Clone)]
pub struct SessionEventListener {
    link: Arc<Mutex<Option<WeakUnboundedSender<EngineCommand>>>>,
}

impl SessionEventListener {
    pub(crate) fn new(engine_tx: &UnboundedSender<EngineCommand>) -> Self {
        Self {
            link: Arc::new(Mutex::new(Some(engine_tx.downgrade()))),
        }
    }

    /// Sever the link; later events are dropped.
    pub(crate) fn shutdown(&self) {
        self.link.lock().take();
    }

    pub fn is_attached(&self) -> bool {
        self.link
            .lock()
            .as_ref()
            .is_some_and(|weak| weak.upgrade().is_some())
    }

    pub fn session_ready(&self, session_id: u64) {
        self.post(EngineEvent::SessionReady { session_id });
    }

    pub fn session_closed(&self, code: u32, reason: impl Into<String>) {
        self.post(EngineEvent::SessionClosed {
            code,
            reason: reason.into(),
        });
    }

    pub fn incoming_unidirectional_stream(&self, reader: NativeReader) {
        self.post(EngineEvent::IncomingUnidirectional(reader));
    }

    pub fn incoming_bidirectional_stream(&self, stream: BidirectionalStream) {
        self.post(EngineEvent::IncomingBidirectional(stream));
    }

    pub fn datagram_received(&self, payload: Bytes) {
        self.post(EngineEvent::DatagramReceived(payload));
    }

    pub fn outgoing_datagram_outcome(&self, id: u64, outcome: DatagramOutcome) {
        self.post(EngineEvent::DatagramOutcome { id, outcome });
    }

    pub fn max_datagram_size(&self, size: u64) {
        self.post(EngineEvent::MaxDatagramSize(size));
    }

    fn post(&self, event: EngineEvent) {
        let tx = self.link.lock().as_ref().and_then(WeakUnboundedSender::upgrade);
        match tx {
            Some(tx) => {
                if let Err(err) = tx.send(EngineCommand::Event(event)) {
                    debug!(event = err.0.name(), "Engine context gone; event dropped");
                }
            }
            None => debug!(event = event.name(), "Listener severed; event dropped"),
        }
    }
}

impl fmt::Debug for SessionEventListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEventListener")
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// One-shot completion for an outgoing stream request.
///
/// Consumed by [`ready`](Self::ready) or [`fail`](Self::fail). Dropping it
/// fails the request through the Engine Context like an explicit `fail`.
pub struct StreamCallback {
    request: Option<StreamRequest>,
    direction: StreamDirection,
    send_order: Option<i64>,
    link: WeakUnboundedSender<EngineCommand>,
}

impl StreamCallback {
    pub(crate) fn new(
        request: StreamRequest,
        link: WeakUnboundedSender<EngineCommand>,
    ) -> Self {
        Self {
            direction: request.direction(),
            send_order: request.send_order,
            request: Some(request),
            link,
        }
    }

    pub const fn direction(&self) -> StreamDirection {
        self.direction
    }

    pub const fn send_order(&self) -> Option<i64> {
        self.send_order
    }

    /// The engine opened the stream.
    pub fn ready(mut self, stream: NativeStream) {
        if let Some(request) = self.request.take() {
            self.post(EngineCommand::StreamReady { request, stream });
        }
    }

    /// The engine could not open the stream.
    pub fn fail(mut self, error: EngineError) {
        if let Some(request) = self.request.take() {
            self.post(EngineCommand::StreamFailed { request, error });
        }
    }

    pub(crate) fn into_request(mut self) -> Option<StreamRequest> {
        self.request.take()
    }

    fn post(&self, command: EngineCommand) {
        let Some(tx) = self.link.upgrade() else {
            debug!(command = command.name(), "Engine context gone; stream completion dropped");
            Self::abandon(command);
            return;
        };
        if let Err(err) = tx.send(command) {
            debug!(command = err.0.name(), "Engine context stopped; stream completion dropped");
            Self::abandon(err.0);
        }
    }

    /// Only reached once both contexts have stopped, so there is no queue
    /// left to resolve on.
    fn abandon(command: EngineCommand) {
        let (EngineCommand::StreamReady { request, .. }
        | EngineCommand::StreamFailed { request, .. }) = command
        else {
            return;
        };
        request
            .fail(BrokerError::GenericFailure(SHUT_DOWN.into()))
            .fire();
    }
}

impl Drop for StreamCallback {
    fn drop(&mut self) {
        if let Some(request) = self.request.take() {
            debug!(direction = self.direction.as_str(), "Stream callback dropped unresolved");
            self.post(EngineCommand::StreamFailed {
                request,
                error: EngineError::Failure(CALLBACK_DROPPED.into()),
            });
        }
    }
}

impl fmt::Debug for StreamCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCallback")
            .field("direction", &self.direction())
            .field("send_order", &self.send_order())
            .finish()
    }
}
