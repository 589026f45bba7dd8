//! Asynchronous copies between native streams and pipe endpoints.

use std::io;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::pipe::{PipeReceiver, PipeSender};
use super::types::{RelayDirection, RelayError, RelayHandle};
use crate::engine::{NativeReader, NativeWriter};

/// Starts copy tasks. Cloning shares the shutdown signal.
#[derive(Debug, Clone, Default)]
pub struct ByteRelay {
    cancel: CancellationToken,
}

impl ByteRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy engine input into a pipe whose receiver goes to the control plane.
    pub fn inbound(&self, source: NativeReader, sink: PipeSender) -> Result<RelayHandle, RelayError> {
        self.start(RelayDirection::Inbound, source, sink)
    }

    /// Copy control-plane output from a pipe into the engine stream.
    pub fn outbound(
        &self,
        source: PipeReceiver,
        sink: NativeWriter,
    ) -> Result<RelayHandle, RelayError> {
        self.start(RelayDirection::Outbound, source, sink)
    }

    /// Cancel running copies and refuse new ones.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn start<R, W>(
        &self,
        direction: RelayDirection,
        reader: R,
        writer: W,
    ) -> Result<RelayHandle, RelayError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        if self.is_shut_down() {
            return Err(RelayError::ShutDown);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| RelayError::NoRuntime)?;
        let cancel = self.cancel.child_token();

        let task = runtime.spawn(async move {
            let result = tokio::select! {
                res = pump(reader, writer) => res,
                () = cancel.cancelled() => {
                    Err(io::Error::new(io::ErrorKind::Interrupted, "relay shut down"))
                }
            };
            match &result {
                Ok(bytes) => debug!(direction = direction.as_str(), bytes, "Relay finished"),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    debug!(direction = direction.as_str(), "Relay cancelled");
                }
                Err(e) => warn!(direction = direction.as_str(), error = %e, "Relay failed"),
            }
            result
        });

        Ok(RelayHandle { direction, task })
    }
}

async fn pump<R, W>(mut reader: R, mut writer: W) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let bytes = tokio::io::copy(&mut reader, &mut writer).await?;
    writer.shutdown().await?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{DuplexPipeFactory, PipeFactory};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn inbound_relay_moves_native_bytes_into_pipe() {
        let relay = ByteRelay::new();
        let (mut peer, native) = tokio::io::duplex(64);
        let (sender, mut receiver) = DuplexPipeFactory.create(64).unwrap();

        let handle = relay.inbound(Box::new(native), sender).unwrap();
        peer.write_all(b"from the wire").await.unwrap();
        peer.shutdown().await.unwrap();

        let mut out = Vec::new();
        receiver.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"from the wire");
        assert_eq!(handle.finished().await.unwrap(), 13);
    }

    #[tokio::test]
    async fn outbound_relay_moves_pipe_bytes_into_native() {
        let relay = ByteRelay::new();
        let (native, mut peer) = tokio::io::duplex(64);
        let (mut sender, receiver) = DuplexPipeFactory.create(64).unwrap();

        let handle = relay.outbound(receiver, Box::new(native)).unwrap();
        assert_eq!(handle.direction(), RelayDirection::Outbound);
        sender.write_all(b"to the wire").await.unwrap();
        drop(sender);

        let mut out = Vec::new();
        peer.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"to the wire");
    }

    #[tokio::test]
    async fn shutdown_cancels_and_refuses_new_copies() {
        let relay = ByteRelay::new();
        let (_peer, native) = tokio::io::duplex(64);
        let (sender, _receiver) = DuplexPipeFactory.create(64).unwrap();
        let handle = relay.inbound(Box::new(native), sender).unwrap();

        relay.shutdown();
        assert!(handle.finished().await.is_err());

        let (_peer, native) = tokio::io::duplex(64);
        let (sender, _receiver) = DuplexPipeFactory.create(64).unwrap();
        let err = relay.inbound(Box::new(native), sender).unwrap_err();
        assert_eq!(err, RelayError::ShutDown);
    }
}
