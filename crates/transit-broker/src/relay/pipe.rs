//! Bounded byte pipes.
//!
//! A pipe is a connected [`PipeSender`]/[`PipeReceiver`] pair. Writes block
//! (return `Pending`) once `capacity` bytes are buffered; dropping the sender
//! signals EOF to the receiver after the buffer drains.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};

use super::types::PipeError;

/// Writing end of a byte pipe.
#[derive(Debug)]
pub struct PipeSender {
    inner: DuplexStream,
}

/// Reading end of a byte pipe.
#[derive(Debug)]
pub struct PipeReceiver {
    inner: DuplexStream,
}

/// Creates pipe pairs. Swappable so allocation failures can be injected.
pub trait PipeFactory: Send + Sync + 'static {
    fn create(&self, capacity: usize) -> Result<(PipeSender, PipeReceiver), PipeError>;
}

/// Default factory backed by `tokio::io::duplex`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DuplexPipeFactory;

impl PipeFactory for DuplexPipeFactory {
    fn create(&self, capacity: usize) -> Result<(PipeSender, PipeReceiver), PipeError> {
        if capacity == 0 {
            return Err(PipeError::InvalidCapacity(capacity));
        }
        let (writer, reader) = tokio::io::duplex(capacity);
        Ok((PipeSender { inner: writer }, PipeReceiver { inner: reader }))
    }
}

impl AsyncWrite for PipeSender {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl AsyncRead for PipeReceiver {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}
