//! Outgoing stream requests and pipe wiring.

use tracing::{debug, warn};

use super::context::Completion;
use crate::control::BidirectionalPipes;
use crate::engine::{BidirectionalStream, NativeReader, NativeStream, NativeWriter};
use crate::error::{BrokerError, BrokerResult};
use crate::relay::{ByteRelay, PipeFactory, PipeReceiver, PipeSender, RelayHandle};
use crate::resolver::PendingResolver;
use crate::session::StreamDirection;

/// Resolver of a stream request, typed by direction.
#[derive(Debug)]
pub(crate) enum StreamResolver {
    Unidirectional(PendingResolver<PipeSender>),
    Bidirectional(PendingResolver<BidirectionalPipes>),
}

/// A pending outgoing stream. Consumed when its resolver fires.
#[derive(Debug)]
pub(crate) struct StreamRequest {
    pub(crate) send_order: Option<i64>,
    resolver: StreamResolver,
}

impl StreamRequest {
    pub(crate) const fn unidirectional(
        send_order: Option<i64>,
        resolver: PendingResolver<PipeSender>,
    ) -> Self {
        Self {
            send_order,
            resolver: StreamResolver::Unidirectional(resolver),
        }
    }

    pub(crate) const fn bidirectional(
        send_order: Option<i64>,
        resolver: PendingResolver<BidirectionalPipes>,
    ) -> Self {
        Self {
            send_order,
            resolver: StreamResolver::Bidirectional(resolver),
        }
    }

    pub(crate) const fn direction(&self) -> StreamDirection {
        match self.resolver {
            StreamResolver::Unidirectional(_) => StreamDirection::Unidirectional,
            StreamResolver::Bidirectional(_) => StreamDirection::Bidirectional,
        }
    }

    pub(crate) fn fail(self, error: BrokerError) -> Completion {
        match self.resolver {
            StreamResolver::Unidirectional(r) => Completion::Unidirectional(r, Err(error)),
            StreamResolver::Bidirectional(r) => Completion::Bidirectional(r, Err(error)),
        }
    }

    /// Turn an opened native stream into pipe endpoints for the caller.
    ///
    /// All-or-nothing: if any pipe or relay cannot be set up, relays already
    /// started are aborted and the request fails.
    pub(crate) fn complete(
        self,
        stream: NativeStream,
        pipes: &dyn PipeFactory,
        relay: &ByteRelay,
        capacity: usize,
    ) -> Completion {
        match (self.resolver, stream) {
            (StreamResolver::Unidirectional(r), NativeStream::Unidirectional(writer)) => {
                let result = relay_outbound(writer, pipes, relay, capacity).map(|(sender, _)| sender);
                Completion::Unidirectional(r, result)
            }
            (StreamResolver::Bidirectional(r), NativeStream::Bidirectional(stream)) => {
                let result = relay_bidirectional(stream, pipes, relay, capacity);
                Completion::Bidirectional(r, result)
            }
            (resolver, stream) => {
                warn!(?stream, "Engine opened a stream of the wrong direction");
                let error =
                    BrokerError::GenericFailure("engine opened a stream of the wrong direction".into());
                match resolver {
                    StreamResolver::Unidirectional(r) => Completion::Unidirectional(r, Err(error)),
                    StreamResolver::Bidirectional(r) => Completion::Bidirectional(r, Err(error)),
                }
            }
        }
    }
}

/// Pipe whose receiver feeds `writer`; the sender goes to the control plane.
pub(crate) fn relay_outbound(
    writer: NativeWriter,
    pipes: &dyn PipeFactory,
    relay: &ByteRelay,
    capacity: usize,
) -> BrokerResult<(PipeSender, RelayHandle)> {
    let (sender, receiver) = pipes.create(capacity)?;
    let handle = relay.outbound(receiver, writer)?;
    Ok((sender, handle))
}

/// Pipe fed from `reader`; the receiver goes to the control plane.
pub(crate) fn relay_inbound(
    reader: NativeReader,
    pipes: &dyn PipeFactory,
    relay: &ByteRelay,
    capacity: usize,
) -> BrokerResult<(PipeReceiver, RelayHandle)> {
    let (sender, receiver) = pipes.create(capacity)?;
    let handle = relay.inbound(reader, sender)?;
    Ok((receiver, handle))
}

/// Inbound direction first, then outbound.
pub(crate) fn relay_bidirectional(
    stream: BidirectionalStream,
    pipes: &dyn PipeFactory,
    relay: &ByteRelay,
    capacity: usize,
) -> BrokerResult<BidirectionalPipes> {
    let BidirectionalStream { reader, writer } = stream;
    let (receiver, inbound) = relay_inbound(reader, pipes, relay, capacity)?;
    match relay_outbound(writer, pipes, relay, capacity) {
        Ok((sender, _outbound)) => Ok(BidirectionalPipes { receiver, sender }),
        Err(e) => {
            debug!(error = %e, "Outbound setup failed; aborting inbound relay");
            inbound.abort();
            Err(e)
        }
    }
}
