//! Session broker.
//!
//! [`SessionBroker`] is the control plane's handle to one session. It spawns
//! two tasks at construction:
//!
//! - the **Engine Context**, owning the [`TransportEngine`] and processing
//!   control-plane requests and engine events in order
//! - the **Owning Context**, firing resolvers for asynchronous results and
//!   pushing notifications to the control channel
//!
//! Shared state lives in one mutex-protected core that is never held across
//! an engine call or a resolver.

pub(crate) mod context;
mod datagram;
mod session_core;
mod stats;
pub(crate) mod stream;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use transit_core::config::{BrokerSettings, DEFAULT_PIPE_CAPACITY};

use self::context::{Completion, EngineCommand, EngineContext, OwningCommand, OwningContext};
use self::session_core::SessionCore;
use self::stream::StreamRequest;
use crate::control::{BidirectionalPipes, CreateSessionRequest};
use crate::engine::{
    ConnectFlags, ConnectRequest, ContextTarget, SessionEventListener, TransportEngine,
};
use crate::error::{BrokerError, BrokerResult};
use crate::relay::{ByteRelay, DuplexPipeFactory, PipeFactory, PipeSender};
use crate::resolver::PendingResolver;
use crate::session::{ReliabilityMode, SessionState, SessionTarget};

pub use stats::BrokerStats;

/// Failure every pending request receives once the broker shuts down.
pub(crate) const SHUT_DOWN: &str = "session broker shut down";

/// Broker settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Whether sessions may be created at all.
    pub enabled: bool,
    /// Capacity of each byte pipe, in bytes.
    pub pipe_capacity: usize,
    /// Bound on outgoing datagrams awaiting an engine outcome.
    pub max_outstanding_datagrams: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
            max_outstanding_datagrams: 1,
        }
    }
}

impl From<&BrokerSettings> for BrokerConfig {
    fn from(settings: &BrokerSettings) -> Self {
        Self {
            enabled: settings.enabled,
            pipe_capacity: settings.pipe_capacity,
            max_outstanding_datagrams: settings.max_outstanding_datagrams,
        }
    }
}

/// State reachable from both contexts and the public handle.
pub(crate) struct BrokerShared {
    pub(crate) core: Mutex<SessionCore>,
    pub(crate) config: BrokerConfig,
    pub(crate) pipes: Arc<dyn PipeFactory>,
    pub(crate) relay: ByteRelay,
    pub(crate) listener: SessionEventListener,
    pub(crate) cancel: CancellationToken,
    owning_tx: mpsc::UnboundedSender<OwningCommand>,
    engine_tx: mpsc::UnboundedSender<EngineCommand>,
}

impl BrokerShared {
    /// Post to the Owning Context. A stopped context drops the command,
    /// which fails any resolver inside it.
    pub(crate) fn post(&self, command: OwningCommand) {
        if self.owning_tx.send(command).is_err() {
            debug!("Owning context stopped; command dropped");
        }
    }

    pub(crate) fn complete(&self, completion: Completion) {
        self.post(OwningCommand::Complete(completion));
    }

    fn post_engine(&self, command: EngineCommand) {
        if let Err(err) = self.engine_tx.send(command) {
            debug!(command = err.0.name(), "Engine context stopped; command dropped");
        }
    }

    /// Unbind the control channel and detach the engine listener.
    pub(crate) fn release(&self) {
        self.listener.shutdown();
        if self.core.lock().release_control().is_some() {
            debug!("Control channel released");
        }
    }
}

/// Control-plane handle to one WebTransport-style session.
///
/// Must be created inside a Tokio runtime. Dropping the handle shuts the
/// broker down.
pub struct SessionBroker {
    shared: Arc<BrokerShared>,
    stopped: AtomicBool,
}

impl SessionBroker {
    pub fn new(config: BrokerConfig, engine: Box<dyn TransportEngine>) -> Self {
        Self::with_pipe_factory(config, engine, Arc::new(DuplexPipeFactory))
    }

    /// Like [`new`](Self::new) with a custom pipe factory.
    pub fn with_pipe_factory(
        config: BrokerConfig,
        engine: Box<dyn TransportEngine>,
        pipes: Arc<dyn PipeFactory>,
    ) -> Self {
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let (owning_tx, owning_rx) = mpsc::unbounded_channel();
        let listener = SessionEventListener::new(&engine_tx);
        let link = engine_tx.downgrade();

        let shared = Arc::new(BrokerShared {
            core: Mutex::new(SessionCore::new(config.max_outstanding_datagrams)),
            config,
            pipes,
            relay: ByteRelay::new(),
            listener,
            cancel: CancellationToken::new(),
            owning_tx,
            engine_tx,
        });

        let target = ContextTarget {
            name: "engine",
            runtime: tokio::runtime::Handle::current(),
        };
        let engine_context = EngineContext::new(engine, Arc::clone(&shared), link, target);
        tokio::spawn(engine_context.run(engine_rx));
        tokio::spawn(OwningContext::new(Arc::clone(&shared)).run(owning_rx));

        Self {
            shared,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.shared.config
    }

    /// Start a session. `resolver` fires once the engine is ready or the
    /// attempt fails.
    pub fn create_session(
        &self,
        request: CreateSessionRequest,
        resolver: PendingResolver<ReliabilityMode>,
    ) {
        let CreateSessionRequest {
            url,
            principal,
            options,
            control,
        } = request;

        if !self.shared.config.enabled {
            debug!("Session creation refused; feature disabled");
            resolver.fail(BrokerError::FeatureDisabled);
            return;
        }
        if !control.is_valid() {
            resolver.fail(BrokerError::InvalidArgument(
                "control channel is closed".into(),
            ));
            return;
        }
        let target = match SessionTarget::parse(&url) {
            Ok(target) => target,
            Err(e) => {
                debug!(url = %url, error = %e, "Session creation refused; bad target");
                resolver.fail(e);
                return;
            }
        };

        let begun = self.shared.core.lock().begin(resolver, control.clone());
        if let Err((resolver, e)) = begun {
            warn!(error = %e, "Session creation refused");
            resolver.fail(e);
            return;
        }

        info!(url = %target, origin = %principal.origin, "Creating session");
        self.shared.post_engine(EngineCommand::Bind {
            control,
            connect: ConnectRequest {
                target,
                principal,
                options,
                flags: ConnectFlags::default(),
            },
        });
    }

    /// Close the session locally. Fails with `InvalidState` if already
    /// closing or closed.
    pub fn close(&self, code: u32, reason: &str) -> BrokerResult<()> {
        let failed = self.shared.core.lock().local_close(code, reason);
        let failed = match failed {
            Ok(failed) => failed,
            Err(e) => {
                error!(code, error = %e, "Close rejected");
                return Err(e);
            }
        };
        info!(code, reason, "Closing session");
        for completion in failed {
            completion.fire();
        }
        self.shared.post_engine(EngineCommand::CloseSession {
            code,
            reason: reason.to_string(),
        });
        Ok(())
    }

    pub fn create_unidirectional_stream(
        &self,
        send_order: Option<i64>,
        resolver: PendingResolver<PipeSender>,
    ) {
        self.request_stream(StreamRequest::unidirectional(send_order, resolver));
    }

    pub fn create_bidirectional_stream(
        &self,
        send_order: Option<i64>,
        resolver: PendingResolver<BidirectionalPipes>,
    ) {
        self.request_stream(StreamRequest::bidirectional(send_order, resolver));
    }

    fn request_stream(&self, request: StreamRequest) {
        let ready = self.shared.core.lock().require_ready("create a stream");
        match ready {
            Ok(()) => self.shared.post_engine(EngineCommand::CreateStream(request)),
            Err(e) => request.fail(e).fire(),
        }
    }

    /// Send one datagram. `expiration` is passed to the engine as is.
    pub fn send_datagram(
        &self,
        payload: Bytes,
        expiration: Option<Instant>,
        resolver: PendingResolver<()>,
    ) {
        let registered = self.shared.core.lock().register_datagram(resolver);
        match registered {
            Ok(id) => {
                debug!(id, len = payload.len(), "Sending datagram");
                self.shared.post_engine(EngineCommand::SendDatagram {
                    id,
                    payload,
                    expiration,
                });
            }
            Err((resolver, e)) => resolver.fail(e),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.core.lock().state()
    }

    pub fn stats(&self) -> BrokerStats {
        self.shared.core.lock().stats()
    }

    /// Largest datagram payload the engine accepts, once reported.
    pub fn max_datagram_size(&self) -> Option<u64> {
        self.shared.core.lock().max_datagram_size()
    }

    /// Stop both contexts and all relays. Outstanding resolvers fail.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Shutting down session broker");
        self.shared.listener.shutdown();
        self.shared.relay.shutdown();
        self.shared.cancel.cancel();

        let failed = self
            .shared
            .core
            .lock()
            .drain_all(&BrokerError::GenericFailure(SHUT_DOWN.into()));
        for completion in failed {
            completion.fire();
        }
        self.shared.core.lock().release_control();
    }
}

impl Drop for SessionBroker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
