//! In-process engine that talks to itself.
//!
//! Bidirectional streams echo what is written to them. Unidirectional
//! streams are read to the end and their bytes come back as a
//! peer-initiated unidirectional stream. Datagrams are echoed back.

use std::time::Instant;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::runtime::Handle;
use tracing::{debug, info};

use super::{
    BidirectionalStream, ConnectRequest, ContextTarget, DatagramOutcome, EngineError,
    NativeStream, SessionEventListener, StreamCallback, StreamRefused, TransportEngine,
};

/// Largest datagram the loopback accepts.
pub const LOOPBACK_MAX_DATAGRAM_SIZE: usize = 1200;

/// Host that makes the loopback refuse the session.
pub const REFUSED_HOST: &str = "refused.invalid";

const STREAM_BUFFER: usize = 16 * 1024;

#[derive(Debug, Default)]
pub struct LoopbackEngine {
    listener: Option<SessionEventListener>,
    runtime: Option<Handle>,
    next_session_id: u64,
    closed: bool,
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn live(&self) -> Result<(&SessionEventListener, &Handle), EngineError> {
        if self.closed {
            return Err(EngineError::InvalidState);
        }
        match (&self.listener, &self.runtime) {
            (Some(listener), Some(runtime)) => Ok((listener, runtime)),
            _ => Err(EngineError::InvalidState),
        }
    }
}

impl TransportEngine for LoopbackEngine {
    fn async_connect(
        &mut self,
        request: ConnectRequest,
        listener: SessionEventListener,
    ) -> Result<(), EngineError> {
        if self.listener.is_some() {
            return Err(EngineError::Failure("loopback already connected".into()));
        }
        if request.target.host() == REFUSED_HOST {
            info!(url = %request.target, "Loopback refusing session");
            listener.session_closed(0, "connection refused");
            return Ok(());
        }

        self.next_session_id += 1;
        listener.session_ready(self.next_session_id);
        listener.max_datagram_size(LOOPBACK_MAX_DATAGRAM_SIZE as u64);
        self.listener = Some(listener);
        Ok(())
    }

    fn retarget_to(&mut self, target: &ContextTarget) -> Result<(), EngineError> {
        debug!(context = target.name, "Loopback retargeted");
        self.runtime = Some(target.runtime.clone());
        Ok(())
    }

    fn create_outgoing_unidirectional_stream(
        &mut self,
        send_order: Option<i64>,
        callback: StreamCallback,
    ) -> Result<(), StreamRefused> {
        let (listener, runtime) = match self.live() {
            Ok((listener, runtime)) => (listener.clone(), runtime.clone()),
            Err(error) => return Err(StreamRefused { error, callback }),
        };
        debug!(?send_order, "Loopback opening unidirectional stream");

        let (local, remote) = tokio::io::duplex(STREAM_BUFFER);
        runtime.spawn(reflect_unidirectional(remote, listener));
        callback.ready(NativeStream::Unidirectional(Box::new(local)));
        Ok(())
    }

    fn create_outgoing_bidirectional_stream(
        &mut self,
        send_order: Option<i64>,
        callback: StreamCallback,
    ) -> Result<(), StreamRefused> {
        let runtime = match self.live() {
            Ok((_, runtime)) => runtime.clone(),
            Err(error) => return Err(StreamRefused { error, callback }),
        };
        debug!(?send_order, "Loopback opening bidirectional stream");

        let (local, remote) = tokio::io::duplex(STREAM_BUFFER);
        runtime.spawn(echo(remote));
        let (reader, writer) = tokio::io::split(local);
        callback.ready(NativeStream::Bidirectional(BidirectionalStream {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }));
        Ok(())
    }

    fn send_datagram(
        &mut self,
        payload: Bytes,
        expiration: Option<Instant>,
        id: u64,
    ) -> Result<(), EngineError> {
        let (listener, _) = self.live()?;
        let outcome = if expiration.is_some_and(|deadline| deadline <= Instant::now()) {
            DatagramOutcome::Dropped
        } else if payload.len() > LOOPBACK_MAX_DATAGRAM_SIZE {
            DatagramOutcome::TooLarge
        } else {
            DatagramOutcome::Sent
        };

        listener.outgoing_datagram_outcome(id, outcome);
        if outcome == DatagramOutcome::Sent {
            listener.datagram_received(payload);
        }
        Ok(())
    }

    fn close_session(&mut self, code: u32, reason: &str) {
        self.closed = true;
        if let Some(listener) = self.listener.take() {
            // Peer acknowledges the close.
            listener.session_closed(code, reason);
        }
    }
}

async fn echo(stream: DuplexStream) {
    let (mut reader, mut writer) = tokio::io::split(stream);
    match tokio::io::copy(&mut reader, &mut writer).await {
        Ok(bytes) => debug!(bytes, "Loopback echo finished"),
        Err(e) => debug!(error = %e, "Loopback echo failed"),
    }
    let _ = writer.shutdown().await;
}

async fn reflect_unidirectional(mut stream: DuplexStream, listener: SessionEventListener) {
    let mut data = Vec::new();
    if let Err(e) = stream.read_to_end(&mut data).await {
        debug!(error = %e, "Loopback sink failed");
        return;
    }
    if data.is_empty() {
        return;
    }

    let (mut peer, local) = tokio::io::duplex(STREAM_BUFFER);
    listener.incoming_unidirectional_stream(Box::new(local));
    if let Err(e) = peer.write_all(&data).await {
        debug!(error = %e, "Loopback reflection failed");
        return;
    }
    let _ = peer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::context::{EngineCommand, EngineEvent};
    use crate::broker::stream::StreamRequest;
    use crate::engine::ConnectFlags;
    use crate::resolver::PendingResolver;
    use crate::session::{Principal, SessionOptions, SessionTarget};
    use tokio::sync::mpsc;

    fn request(url: &str) -> ConnectRequest {
        ConnectRequest {
            target: SessionTarget::parse(url).unwrap(),
            principal: Principal::anonymous(),
            options: SessionOptions::default(),
            flags: ConnectFlags::default(),
        }
    }

    fn connected() -> (
        LoopbackEngine,
        mpsc::UnboundedSender<EngineCommand>,
        mpsc::UnboundedReceiver<EngineCommand>,
    ) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut engine = LoopbackEngine::new();
        engine
            .async_connect(request("loopback"), SessionEventListener::new(&tx))
            .unwrap();
        engine
            .retarget_to(&ContextTarget {
                name: "test",
                runtime: Handle::current(),
            })
            .unwrap();
        // session ready + max datagram size
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        (engine, tx, rx)
    }

    #[tokio::test]
    async fn connect_reports_ready_then_datagram_size() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut engine = LoopbackEngine::new();
        engine
            .async_connect(request("loopback"), SessionEventListener::new(&tx))
            .unwrap();

        assert!(matches!(
            rx.try_recv().unwrap(),
            EngineCommand::Event(EngineEvent::SessionReady { session_id: 1 })
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            EngineCommand::Event(EngineEvent::MaxDatagramSize(1200))
        ));
    }

    #[tokio::test]
    async fn refused_host_reports_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut engine = LoopbackEngine::new();
        engine
            .async_connect(request(REFUSED_HOST), SessionEventListener::new(&tx))
            .unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            EngineCommand::Event(EngineEvent::SessionClosed { code: 0, .. })
        ));
    }

    #[tokio::test]
    async fn oversized_datagram_is_reported_too_large() {
        let (mut engine, _tx, mut rx) = connected();
        engine
            .send_datagram(Bytes::from(vec![0_u8; 1500]), None, 9)
            .unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            EngineCommand::Event(EngineEvent::DatagramOutcome {
                id: 9,
                outcome: DatagramOutcome::TooLarge
            })
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn sent_datagram_is_echoed() {
        let (mut engine, _tx, mut rx) = connected();
        engine.send_datagram(Bytes::from_static(b"hi"), None, 1).unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            EngineCommand::Event(EngineEvent::DatagramOutcome {
                id: 1,
                outcome: DatagramOutcome::Sent
            })
        ));
        match rx.try_recv().unwrap() {
            EngineCommand::Event(EngineEvent::DatagramReceived(payload)) => {
                assert_eq!(&payload[..], b"hi");
            }
            other => panic!("unexpected {}", other.name()),
        }
    }

    #[tokio::test]
    async fn bidirectional_stream_echoes() {
        let (mut engine, tx, mut rx) = connected();
        let (resolver, _) = PendingResolver::channel("bidirectional stream");
        let callback = StreamCallback::new(StreamRequest::bidirectional(None, resolver), tx.downgrade());
        engine.create_outgoing_bidirectional_stream(None, callback).unwrap();

        let Some(EngineCommand::StreamReady { stream, .. }) = rx.recv().await else {
            panic!("expected stream ready");
        };
        let NativeStream::Bidirectional(BidirectionalStream { mut reader, mut writer }) = stream
        else {
            panic!("expected bidirectional stream");
        };
        writer.write_all(b"echo").await.unwrap();
        let mut buf = [0_u8; 4];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"echo");
    }

    #[tokio::test]
    async fn closed_engine_refuses_streams() {
        let (mut engine, tx, _rx) = connected();
        engine.close_session(1000, "done");

        let (resolver, _) = PendingResolver::channel("unidirectional stream");
        let callback =
            StreamCallback::new(StreamRequest::unidirectional(None, resolver), tx.downgrade());
        let refused = engine
            .create_outgoing_unidirectional_stream(None, callback)
            .unwrap_err();
        assert_eq!(refused.error, EngineError::InvalidState);
    }
}
