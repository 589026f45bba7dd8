//! Shared fixtures: a scripted engine the test drives by hand and a pipe
//! factory that counts (and optionally fails) allocations.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use transit_broker::engine::{
    ConnectRequest, ContextTarget, EngineError, StreamRefused, TransportEngine,
};
use transit_broker::relay::{DuplexPipeFactory, PipeError, PipeFactory};
use transit_broker::{
    BrokerConfig, BrokerResult, ControlChannel, CreateSessionRequest, Notification,
    PendingResolver, PipeReceiver, PipeSender, Principal, ReliabilityMode, SessionBroker,
    SessionEventListener, SessionOptions, StreamCallback,
};

pub const WAIT: Duration = Duration::from_secs(2);

/// Engine calls in the order they were made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect { url: String },
    Retarget { context: &'static str },
    UnidirectionalStream { send_order: Option<i64> },
    BidirectionalStream { send_order: Option<i64> },
    Datagram { id: u64, len: usize, expires: bool },
    Close { code: u32, reason: String },
}

/// Scripted failures.
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    pub connect_error: Option<EngineError>,
    pub retarget_error: Option<EngineError>,
    pub stream_error: Option<EngineError>,
    pub datagram_error: Option<EngineError>,
    /// Drop stream callbacks inside the engine call instead of keeping them.
    pub drop_stream_callbacks: bool,
}

#[derive(Default)]
struct Recorded {
    calls: Vec<Call>,
    listener: Option<SessionEventListener>,
    callbacks: Vec<StreamCallback>,
    in_engine_call: bool,
}

/// Test-side view of a [`ScriptedEngine`].
#[derive(Clone, Default)]
pub struct Recorder {
    inner: Arc<Mutex<Recorded>>,
}

impl Recorder {
    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().calls.clone()
    }

    pub fn listener(&self) -> Option<SessionEventListener> {
        self.inner.lock().listener.clone()
    }

    pub fn take_callback(&self) -> Option<StreamCallback> {
        let mut inner = self.inner.lock();
        if inner.callbacks.is_empty() {
            None
        } else {
            Some(inner.callbacks.remove(0))
        }
    }

    /// Whether a scripted engine method is currently on the stack.
    pub fn in_engine_call(&self) -> bool {
        self.inner.lock().in_engine_call
    }

    pub fn datagram_ids(&self) -> Vec<u64> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Datagram { id, .. } => Some(id),
                _ => None,
            })
            .collect()
    }

    pub async fn wait_for_listener(&self) -> SessionEventListener {
        let recorder = self.clone();
        eventually(move || recorder.listener().is_some()).await;
        self.listener().unwrap()
    }

    pub async fn wait_for_callback(&self) -> StreamCallback {
        let recorder = self.clone();
        eventually(move || !recorder.inner.lock().callbacks.is_empty()).await;
        self.take_callback().unwrap()
    }

    pub async fn wait_for_call(&self, expected: Call) {
        let recorder = self.clone();
        eventually(move || recorder.calls().contains(&expected)).await;
    }
}

/// Engine that records every call and leaves the replies to the test.
pub struct ScriptedEngine {
    recorder: Recorder,
    behavior: Behavior,
}

impl ScriptedEngine {
    pub fn new(behavior: Behavior) -> (Self, Recorder) {
        let recorder = Recorder::default();
        (
            Self {
                recorder: recorder.clone(),
                behavior,
            },
            recorder,
        )
    }

    fn record(&self, call: Call) {
        self.recorder.inner.lock().calls.push(call);
    }

    fn stream(
        &self,
        call: Call,
        callback: StreamCallback,
    ) -> Result<(), StreamRefused> {
        self.record(call);
        if let Some(error) = self.behavior.stream_error.clone() {
            return Err(StreamRefused { error, callback });
        }
        if self.behavior.drop_stream_callbacks {
            self.recorder.inner.lock().in_engine_call = true;
            drop(callback);
            self.recorder.inner.lock().in_engine_call = false;
            return Ok(());
        }
        self.recorder.inner.lock().callbacks.push(callback);
        Ok(())
    }
}

impl TransportEngine for ScriptedEngine {
    fn async_connect(
        &mut self,
        request: ConnectRequest,
        listener: SessionEventListener,
    ) -> Result<(), EngineError> {
        self.record(Call::Connect {
            url: request.target.to_string(),
        });
        if let Some(error) = self.behavior.connect_error.clone() {
            return Err(error);
        }
        self.recorder.inner.lock().listener = Some(listener);
        Ok(())
    }

    fn retarget_to(&mut self, target: &ContextTarget) -> Result<(), EngineError> {
        self.record(Call::Retarget {
            context: target.name,
        });
        self.behavior.retarget_error.clone().map_or(Ok(()), Err)
    }

    fn create_outgoing_unidirectional_stream(
        &mut self,
        send_order: Option<i64>,
        callback: StreamCallback,
    ) -> Result<(), StreamRefused> {
        self.stream(Call::UnidirectionalStream { send_order }, callback)
    }

    fn create_outgoing_bidirectional_stream(
        &mut self,
        send_order: Option<i64>,
        callback: StreamCallback,
    ) -> Result<(), StreamRefused> {
        self.stream(Call::BidirectionalStream { send_order }, callback)
    }

    fn send_datagram(
        &mut self,
        payload: Bytes,
        expiration: Option<Instant>,
        id: u64,
    ) -> Result<(), EngineError> {
        self.record(Call::Datagram {
            id,
            len: payload.len(),
            expires: expiration.is_some(),
        });
        self.behavior.datagram_error.clone().map_or(Ok(()), Err)
    }

    fn close_session(&mut self, code: u32, reason: &str) {
        self.record(Call::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

/// Counts pipe allocations; allocation number `fail_at` (1-based) fails.
#[derive(Debug, Default)]
pub struct CountingPipes {
    created: AtomicUsize,
    fail_at: Option<usize>,
}

impl CountingPipes {
    pub fn failing_at(n: usize) -> Self {
        Self {
            created: AtomicUsize::new(0),
            fail_at: Some(n),
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl PipeFactory for CountingPipes {
    fn create(&self, capacity: usize) -> Result<(PipeSender, PipeReceiver), PipeError> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_at == Some(n) {
            return Err(PipeError::Allocation(format!("pipe {n} refused")));
        }
        DuplexPipeFactory.create(capacity)
    }
}

/// Poll `condition` until it holds; panics after [`WAIT`].
pub async fn eventually<F: FnMut() -> bool>(mut condition: F) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {WAIT:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Await a resolver result with a timeout.
pub async fn resolved<T>(rx: tokio::sync::oneshot::Receiver<BrokerResult<T>>) -> BrokerResult<T> {
    tokio::time::timeout(WAIT, rx)
        .await
        .expect("resolver did not fire in time")
        .expect("resolver dropped its channel")
}

pub fn session_request(url: &str, control: ControlChannel) -> CreateSessionRequest {
    CreateSessionRequest {
        url: url.to_string(),
        principal: Principal::new("https://app.example"),
        options: SessionOptions::default(),
        control,
    }
}

/// A broker whose session is `Ready`.
pub struct ReadySession {
    pub broker: SessionBroker,
    pub recorder: Recorder,
    pub listener: SessionEventListener,
    pub notifications: mpsc::UnboundedReceiver<Notification>,
}

pub async fn ready_session(
    config: BrokerConfig,
    behavior: Behavior,
    pipes: Arc<dyn PipeFactory>,
) -> ReadySession {
    let (engine, recorder) = ScriptedEngine::new(behavior);
    let broker = SessionBroker::with_pipe_factory(config, Box::new(engine), pipes);
    let (control, notifications) = ControlChannel::new();

    let (resolver, rx) = PendingResolver::channel("create session");
    broker.create_session(session_request("example", control), resolver);
    let listener = recorder.wait_for_listener().await;
    listener.session_ready(42);
    assert_eq!(resolved(rx).await, Ok(ReliabilityMode::SupportsUnreliable));

    ReadySession {
        broker,
        recorder,
        listener,
        notifications,
    }
}

pub async fn default_ready_session() -> ReadySession {
    ready_session(
        BrokerConfig::default(),
        Behavior::default(),
        Arc::new(DuplexPipeFactory),
    )
    .await
}

/// Next notification, or `None` if the channel closed or stayed quiet.
pub async fn next_notification(
    notifications: &mut mpsc::UnboundedReceiver<Notification>,
    within: Duration,
) -> Option<Notification> {
    tokio::time::timeout(within, notifications.recv())
        .await
        .ok()
        .flatten()
}
