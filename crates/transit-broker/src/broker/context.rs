//! The two execution contexts and their message enums.
//!
//! The Engine Context owns the engine and is the only place engine methods
//! are called. The Owning Context is the only place resolvers fire for
//! asynchronous results and the only place notifications are pushed. Each
//! context drains one unbounded queue through one dispatch function.

use std::sync::Arc;
use std::time::{Instant, SystemTime};

use bytes::Bytes;
use tokio::sync::mpsc::{UnboundedReceiver, WeakUnboundedSender};
use tracing::{debug, error, info, warn};

use super::BrokerShared;
use super::session_core::RemoteClose;
use super::stream::{StreamRequest, relay_bidirectional, relay_inbound};
use crate::control::{BidirectionalPipes, ControlChannel, Notification};
use crate::engine::{
    BidirectionalStream, ConnectRequest, ContextTarget, DatagramOutcome, EngineError,
    NativeReader, NativeStream, StreamCallback, StreamRefused, TransportEngine,
};
use crate::error::{BrokerError, BrokerResult};
use crate::relay::PipeSender;
use crate::resolver::PendingResolver;
use crate::session::{ReliabilityMode, StreamDirection};

/// Messages processed on the Engine Context.
pub(crate) enum EngineCommand {
    /// Bind the control channel and start connecting.
    Bind {
        control: ControlChannel,
        connect: ConnectRequest,
    },
    CreateStream(StreamRequest),
    SendDatagram {
        id: u64,
        payload: Bytes,
        expiration: Option<Instant>,
    },
    CloseSession {
        code: u32,
        reason: String,
    },
    StreamReady {
        request: StreamRequest,
        stream: NativeStream,
    },
    StreamFailed {
        request: StreamRequest,
        error: EngineError,
    },
    Event(EngineEvent),
}

impl EngineCommand {
    pub(crate) const fn name(&self) -> &'static str {
        match self {
            Self::Bind { .. } => "bind",
            Self::CreateStream(_) => "create-stream",
            Self::SendDatagram { .. } => "send-datagram",
            Self::CloseSession { .. } => "close-session",
            Self::StreamReady { .. } => "stream-ready",
            Self::StreamFailed { .. } => "stream-failed",
            Self::Event(event) => event.name(),
        }
    }
}

/// Callbacks from the engine, as posted by the listener.
pub(crate) enum EngineEvent {
    SessionReady { session_id: u64 },
    SessionClosed { code: u32, reason: String },
    IncomingUnidirectional(NativeReader),
    IncomingBidirectional(BidirectionalStream),
    DatagramReceived(Bytes),
    DatagramOutcome { id: u64, outcome: DatagramOutcome },
    MaxDatagramSize(u64),
}

impl EngineEvent {
    pub(crate) const fn name(&self) -> &'static str {
        match self {
            Self::SessionReady { .. } => "session-ready",
            Self::SessionClosed { .. } => "session-closed",
            Self::IncomingUnidirectional(_) => "incoming-unidirectional",
            Self::IncomingBidirectional(_) => "incoming-bidirectional",
            Self::DatagramReceived(_) => "datagram-received",
            Self::DatagramOutcome { .. } => "datagram-outcome",
            Self::MaxDatagramSize(_) => "max-datagram-size",
        }
    }
}

/// A resolver paired with the result it is to receive.
#[derive(Debug)]
pub(crate) enum Completion {
    Session(PendingResolver<ReliabilityMode>, BrokerResult<ReliabilityMode>),
    Datagram(PendingResolver<()>, BrokerResult<()>),
    Unidirectional(PendingResolver<PipeSender>, BrokerResult<PipeSender>),
    Bidirectional(
        PendingResolver<BidirectionalPipes>,
        BrokerResult<BidirectionalPipes>,
    ),
}

impl Completion {
    pub(crate) fn is_ok(&self) -> bool {
        match self {
            Self::Session(_, r) => r.is_ok(),
            Self::Datagram(_, r) => r.is_ok(),
            Self::Unidirectional(_, r) => r.is_ok(),
            Self::Bidirectional(_, r) => r.is_ok(),
        }
    }

    pub(crate) fn fire(self) {
        match self {
            Self::Session(resolver, result) => resolver.resolve(result),
            Self::Datagram(resolver, result) => resolver.resolve(result),
            Self::Unidirectional(resolver, result) => resolver.resolve(result),
            Self::Bidirectional(resolver, result) => resolver.resolve(result),
        }
    }
}

/// Messages processed on the Owning Context.
#[derive(Debug)]
pub(crate) enum OwningCommand {
    /// The engine is ready; fire the creation resolver.
    CreationReady,
    Complete(Completion),
    Notify(Notification),
    /// Unbind the control channel and sever the engine listener.
    Release,
}

// ---------------------------------------------------------------------------
// Engine Context
// ---------------------------------------------------------------------------

pub(crate) struct EngineContext {
    engine: Box<dyn TransportEngine>,
    shared: Arc<BrokerShared>,
    link: WeakUnboundedSender<EngineCommand>,
    target: ContextTarget,
    connected: bool,
}

impl EngineContext {
    pub(crate) fn new(
        engine: Box<dyn TransportEngine>,
        shared: Arc<BrokerShared>,
        link: WeakUnboundedSender<EngineCommand>,
        target: ContextTarget,
    ) -> Self {
        Self {
            engine,
            shared,
            link,
            target,
            connected: false,
        }
    }

    pub(crate) async fn run(mut self, mut commands: UnboundedReceiver<EngineCommand>) {
        let cancel = self.shared.cancel.clone();
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.dispatch(command),
                    None => break,
                },
            }
        }
        debug!("Engine context stopped");
        // Close the queue before the engine goes, so callbacks it drops
        // fail with the shutdown error.
        drop(commands);
        drop(self);
    }

    fn dispatch(&mut self, command: EngineCommand) {
        debug!(command = command.name(), "Engine context dispatch");
        match command {
            EngineCommand::Bind { control, connect } => self.bind(&control, connect),
            EngineCommand::CreateStream(request) => self.create_stream(request),
            EngineCommand::SendDatagram {
                id,
                payload,
                expiration,
            } => self.send_datagram(id, payload, expiration),
            EngineCommand::CloseSession { code, reason } => self.close_session(code, &reason),
            EngineCommand::StreamReady { request, stream } => {
                let direction = request.direction();
                let completion = request.complete(
                    stream,
                    self.shared.pipes.as_ref(),
                    &self.shared.relay,
                    self.shared.config.pipe_capacity,
                );
                if completion.is_ok() {
                    self.shared.core.lock().record_outbound_stream();
                    debug!(direction = direction.as_str(), "Outgoing stream wired");
                }
                self.shared.complete(completion);
            }
            EngineCommand::StreamFailed { request, error } => {
                debug!(direction = request.direction().as_str(), error = %error, "Engine failed stream request");
                self.shared.complete(request.fail(error.into()));
            }
            EngineCommand::Event(event) => self.on_event(event),
        }
    }

    fn bind(&mut self, control: &ControlChannel, connect: ConnectRequest) {
        if !self.shared.core.lock().is_connecting() {
            debug!("Session left connecting before bind; skipping connect");
            return;
        }
        if !control.is_valid() {
            self.fail_creation(BrokerError::ConnectFailure(
                "control channel closed before bind".into(),
            ));
            return;
        }

        info!(
            url = %connect.target,
            dedicated = connect.options.dedicated,
            require_unreliable = connect.options.require_unreliable,
            congestion_control = connect.options.congestion_control.as_str(),
            client_info = connect.options.client_info.as_deref().unwrap_or(""),
            "Connecting session"
        );
        match self.engine.async_connect(connect, self.shared.listener.clone()) {
            Ok(()) => self.connected = true,
            Err(e) => {
                warn!(error = %e, "Engine refused connect");
                self.fail_creation(BrokerError::ConnectFailure(e.to_string()));
            }
        }
    }

    fn fail_creation(&self, error: BrokerError) {
        let completion = self.shared.core.lock().creation_failed(error);
        if let Some(completion) = completion {
            self.shared.complete(completion);
            self.shared.post(OwningCommand::Release);
        }
    }

    fn create_stream(&mut self, request: StreamRequest) {
        let ready = self.shared.core.lock().require_ready("create a stream");
        if let Err(e) = ready {
            self.shared.complete(request.fail(e));
            return;
        }
        let direction = request.direction();
        let send_order = request.send_order;
        debug!(direction = direction.as_str(), ?send_order, "Requesting outgoing stream");

        let callback = StreamCallback::new(request, self.link.clone());
        let refused = match direction {
            StreamDirection::Unidirectional => self
                .engine
                .create_outgoing_unidirectional_stream(send_order, callback),
            StreamDirection::Bidirectional => self
                .engine
                .create_outgoing_bidirectional_stream(send_order, callback),
        };
        if let Err(StreamRefused { error, callback }) = refused {
            debug!(direction = direction.as_str(), error = %error, "Engine refused stream request");
            if let Some(request) = callback.into_request() {
                self.shared.complete(request.fail(error.into()));
            }
        }
    }

    fn send_datagram(&mut self, id: u64, payload: Bytes, expiration: Option<Instant>) {
        if let Err(e) = self.engine.send_datagram(payload, expiration, id) {
            warn!(id, error = %e, "Engine refused datagram");
            let resolver = {
                let mut core = self.shared.core.lock();
                let resolver = core.take_datagram(id);
                if resolver.is_some() {
                    core.record_datagram_outcome(false);
                }
                resolver
            };
            if let Some(resolver) = resolver {
                self.shared.complete(Completion::Datagram(
                    resolver,
                    Err(BrokerError::GenericFailure(e.to_string())),
                ));
            }
        }
    }

    fn close_session(&mut self, code: u32, reason: &str) {
        if self.connected {
            self.engine.close_session(code, reason);
        } else {
            debug!(code, "Session never connected; no engine close");
        }
        self.shared.core.lock().close_issued();
        self.shared.post(OwningCommand::Release);
        info!(code, reason, "Session closed locally");
    }

    fn on_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::SessionReady { session_id } => self.on_session_ready(session_id),
            EngineEvent::SessionClosed { code, reason } => self.on_session_closed(code, reason),
            EngineEvent::IncomingUnidirectional(reader) => self.on_incoming_unidirectional(reader),
            EngineEvent::IncomingBidirectional(stream) => self.on_incoming_bidirectional(stream),
            EngineEvent::DatagramReceived(payload) => {
                self.shared.core.lock().record_datagram_received();
                self.shared.post(OwningCommand::Notify(Notification::IncomingDatagram {
                    payload,
                    received_at: SystemTime::now(),
                }));
            }
            EngineEvent::DatagramOutcome { id, outcome } => self.on_datagram_outcome(id, outcome),
            EngineEvent::MaxDatagramSize(size) => {
                debug!(size, "Engine reported max datagram size");
                self.shared.core.lock().set_max_datagram_size(size);
            }
        }
    }

    fn on_session_ready(&mut self, session_id: u64) {
        if !self.shared.core.lock().begin_retarget() {
            debug!(session_id, "Ignoring session ready");
            return;
        }
        if let Err(e) = self.engine.retarget_to(&self.target) {
            warn!(session_id, error = %e, "Retarget failed");
            self.fail_creation(e.into());
            return;
        }
        if self.shared.core.lock().engine_ready() {
            info!(session_id, "Session ready");
            self.shared.post(OwningCommand::CreationReady);
        }
    }

    fn on_session_closed(&mut self, code: u32, reason: String) {
        let step = self.shared.core.lock().remote_closed(code, reason);
        match step {
            RemoteClose::Failed(completion) => {
                info!(code, "Session closed before it became ready");
                if let Some(completion) = completion {
                    self.shared.complete(completion);
                }
                self.shared.post(OwningCommand::Release);
            }
            RemoteClose::Deferred => debug!(code, "Remote close deferred until creation resolves"),
            RemoteClose::Closed {
                notification,
                abandoned,
            } => {
                info!(code, "Session closed by remote");
                for completion in abandoned {
                    self.shared.complete(completion);
                }
                self.shared.post(OwningCommand::Notify(notification));
                self.shared.post(OwningCommand::Release);
            }
            RemoteClose::Ignored => debug!(code, "Ignoring repeated or late session close"),
        }
    }

    fn on_incoming_unidirectional(&self, reader: NativeReader) {
        let shared = &self.shared;
        match relay_inbound(reader, shared.pipes.as_ref(), &shared.relay, shared.config.pipe_capacity) {
            Ok((receiver, _relay)) => {
                shared.core.lock().record_inbound_stream(true);
                shared.post(OwningCommand::Notify(
                    Notification::IncomingUnidirectionalStream(receiver),
                ));
            }
            Err(e) => {
                shared.core.lock().record_inbound_stream(false);
                warn!(error = %e, "Dropping incoming unidirectional stream");
            }
        }
    }

    fn on_incoming_bidirectional(&self, stream: BidirectionalStream) {
        let shared = &self.shared;
        match relay_bidirectional(stream, shared.pipes.as_ref(), &shared.relay, shared.config.pipe_capacity) {
            Ok(pipes) => {
                shared.core.lock().record_inbound_stream(true);
                shared.post(OwningCommand::Notify(
                    Notification::IncomingBidirectionalStream(pipes),
                ));
            }
            Err(e) => {
                shared.core.lock().record_inbound_stream(false);
                warn!(error = %e, "Dropping incoming bidirectional stream");
            }
        }
    }

    fn on_datagram_outcome(&self, id: u64, outcome: DatagramOutcome) {
        let sent = outcome == DatagramOutcome::Sent;
        let resolver = self.shared.core.lock().take_datagram(id);
        let Some(resolver) = resolver else {
            warn!(id, outcome = outcome.as_str(), "Outcome for unknown datagram");
            return;
        };
        self.shared.core.lock().record_datagram_outcome(sent);
        let result = if sent {
            Ok(())
        } else {
            Err(BrokerError::GenericFailure(format!(
                "datagram {id} not sent: {}",
                outcome.as_str()
            )))
        };
        self.shared.complete(Completion::Datagram(resolver, result));
    }
}

// ---------------------------------------------------------------------------
// Owning Context
// ---------------------------------------------------------------------------

pub(crate) struct OwningContext {
    shared: Arc<BrokerShared>,
}

impl OwningContext {
    pub(crate) const fn new(shared: Arc<BrokerShared>) -> Self {
        Self { shared }
    }

    pub(crate) async fn run(self, mut commands: UnboundedReceiver<OwningCommand>) {
        let cancel = self.shared.cancel.clone();
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.dispatch(command),
                    None => break,
                },
            }
        }
        debug!("Owning context stopped");
    }

    fn dispatch(&self, command: OwningCommand) {
        match command {
            OwningCommand::CreationReady => self.on_creation_ready(),
            OwningCommand::Complete(completion) => completion.fire(),
            OwningCommand::Notify(notification) => self.notify(notification),
            OwningCommand::Release => self.shared.release(),
        }
    }

    fn on_creation_ready(&self) {
        let resolver = self.shared.core.lock().take_ready_resolver();
        let Some(resolver) = resolver else {
            debug!("Creation already resolved; ready ignored");
            return;
        };
        resolver.succeed(ReliabilityMode::SupportsUnreliable);

        let deferred = self.shared.core.lock().take_deferred_close();
        if let Some((notification, abandoned)) = deferred {
            debug!("Delivering deferred remote close");
            for completion in abandoned {
                completion.fire();
            }
            self.notify(notification);
            self.shared.release();
        }
    }

    fn notify(&self, notification: Notification) {
        let control = self.shared.core.lock().control();
        let name = notification.name();
        match control {
            Some(control) => {
                if !control.notify(notification) {
                    error!(notification = name, "Control plane gone; notification lost");
                }
            }
            None => debug!(notification = name, "No control channel bound; notification dropped"),
        }
    }
}
