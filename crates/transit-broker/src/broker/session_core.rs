//! Shared session state.
//!
//! `SessionCore` sits behind the broker's mutex. Its methods only update
//! state and hand back the resolvers and notifications the caller must
//! dispatch; nothing here fires a resolver or talks to the engine, so every
//! method is safe to call with the lock held.

use tracing::error;

use super::context::Completion;
use super::datagram::DatagramSlot;
use super::stats::BrokerStats;
use crate::control::{ControlChannel, Notification};
use crate::error::{BrokerError, BrokerResult};
use crate::resolver::PendingResolver;
use crate::session::{ReliabilityMode, SessionEvent, SessionMachine, SessionState};

/// What a remote close did to the session.
#[derive(Debug)]
pub(crate) enum RemoteClose {
    /// Closed before readiness; the creation resolver (if any) fails.
    Failed(Option<Completion>),
    /// Closed while the creation resolver is outstanding; held back.
    Deferred,
    /// Closed after readiness.
    Closed {
        notification: Notification,
        abandoned: Vec<Completion>,
    },
    /// Repeated or after a local close.
    Ignored,
}

#[derive(Debug)]
pub(crate) struct SessionCore {
    machine: SessionMachine,
    started: bool,
    retargeted: bool,
    creation: Option<PendingResolver<ReliabilityMode>>,
    deferred_close: Option<(u32, String)>,
    datagrams: DatagramSlot,
    control: Option<ControlChannel>,
    max_datagram_size: Option<u64>,
    stats: BrokerStats,
}

impl SessionCore {
    pub(crate) fn new(max_outstanding_datagrams: usize) -> Self {
        Self {
            machine: SessionMachine::new(),
            started: false,
            retargeted: false,
            creation: None,
            deferred_close: None,
            datagrams: DatagramSlot::new(max_outstanding_datagrams),
            control: None,
            max_datagram_size: None,
            stats: BrokerStats::default(),
        }
    }

    pub(crate) const fn state(&self) -> SessionState {
        self.machine.state()
    }

    pub(crate) fn is_connecting(&self) -> bool {
        self.machine.state() == SessionState::Connecting
    }

    /// Record the creation resolver and control channel of a new session.
    pub(crate) fn begin(
        &mut self,
        resolver: PendingResolver<ReliabilityMode>,
        control: ControlChannel,
    ) -> Result<(), (PendingResolver<ReliabilityMode>, BrokerError)> {
        if self.started || !self.is_connecting() {
            let err = BrokerError::InvalidState(format!(
                "session already created (state {})",
                self.machine.state()
            ));
            return Err((resolver, err));
        }
        self.started = true;
        self.creation = Some(resolver);
        self.control = Some(control);
        Ok(())
    }

    /// Bind, connect or retarget failed.
    pub(crate) fn creation_failed(&mut self, error: BrokerError) -> Option<Completion> {
        if self.creation.is_none() {
            return None;
        }
        if let Err(e) = self.machine.apply(SessionEvent::CreationFailed) {
            error!(error = %e, "Creation failure rejected");
            return None;
        }
        self.deferred_close = None;
        self.creation
            .take()
            .map(|resolver| Completion::Session(resolver, Err(error)))
    }

    /// Claim the one retarget of this session; `false` for repeats.
    pub(crate) fn begin_retarget(&mut self) -> bool {
        if self.retargeted || self.creation.is_none() || !self.is_connecting() {
            return false;
        }
        self.retargeted = true;
        true
    }

    /// Mark the engine ready; `true` when the creation resolver should fire.
    pub(crate) fn engine_ready(&mut self) -> bool {
        self.creation.is_some() && self.machine.apply(SessionEvent::EngineReady).is_ok()
    }

    /// Take the creation resolver for success and enter `Ready`.
    pub(crate) fn take_ready_resolver(&mut self) -> Option<PendingResolver<ReliabilityMode>> {
        if !self.machine.engine_ready() || !self.is_connecting() {
            return None;
        }
        let resolver = self.creation.take()?;
        if let Err(e) = self.machine.apply(SessionEvent::CreationSucceeded) {
            error!(error = %e, "Creation success rejected");
        }
        Some(resolver)
    }

    /// Apply a remote close held back while creation was outstanding.
    pub(crate) fn take_deferred_close(&mut self) -> Option<(Notification, Vec<Completion>)> {
        let (code, reason) = self.deferred_close.take()?;
        match self.remote_closed(code, reason) {
            RemoteClose::Closed {
                notification,
                abandoned,
            } => Some((notification, abandoned)),
            _ => None,
        }
    }

    pub(crate) fn remote_closed(&mut self, code: u32, reason: String) -> RemoteClose {
        match self.machine.state() {
            SessionState::Connecting if self.machine.engine_ready() => {
                if self.creation.is_some() && self.deferred_close.is_none() {
                    self.deferred_close = Some((code, reason));
                    RemoteClose::Deferred
                } else {
                    RemoteClose::Ignored
                }
            }
            SessionState::Connecting if self.started => {
                let event = SessionEvent::RemoteClosed {
                    code,
                    reason: reason.clone(),
                };
                if self.machine.apply(event).is_err() {
                    return RemoteClose::Ignored;
                }
                let error = BrokerError::ConnectFailure(format!(
                    "session closed before it became ready (code {code}): {reason}"
                ));
                RemoteClose::Failed(
                    self.creation
                        .take()
                        .map(|resolver| Completion::Session(resolver, Err(error))),
                )
            }
            SessionState::Ready => {
                let event = SessionEvent::RemoteClosed {
                    code,
                    reason: reason.clone(),
                };
                if self.machine.apply(event).is_err() {
                    return RemoteClose::Ignored;
                }
                let abandoned = self.drain_datagrams(&BrokerError::RemoteClosed {
                    code,
                    reason: reason.clone(),
                });
                RemoteClose::Closed {
                    notification: Notification::RemoteClosed {
                        clean: true,
                        code,
                        reason,
                    },
                    abandoned,
                }
            }
            _ => RemoteClose::Ignored,
        }
    }

    /// Enter `Closing`, handing back every outstanding resolver as a failure.
    pub(crate) fn local_close(&mut self, code: u32, reason: &str) -> BrokerResult<Vec<Completion>> {
        self.machine
            .apply(SessionEvent::LocalClose {
                code,
                reason: reason.to_string(),
            })
            .map_err(|e| BrokerError::InvalidState(e.to_string()))?;

        self.deferred_close = None;
        let mut failed = Vec::new();
        if let Some(resolver) = self.creation.take() {
            failed.push(Completion::Session(
                resolver,
                Err(BrokerError::GenericFailure(
                    "session closed before it became ready".into(),
                )),
            ));
        }
        failed.extend(self.drain_datagrams(&BrokerError::InvalidState("session closed".into())));
        Ok(failed)
    }

    /// The engine has been told to close.
    pub(crate) fn close_issued(&mut self) {
        if let Err(e) = self.machine.apply(SessionEvent::CloseIssued) {
            error!(error = %e, "Close issue rejected");
        }
    }

    pub(crate) fn require_ready(&self, operation: &str) -> BrokerResult<()> {
        match self.machine.state() {
            SessionState::Ready => Ok(()),
            state => Err(BrokerError::InvalidState(format!(
                "cannot {operation} while session is {state}"
            ))),
        }
    }

    /// Reserve an id for an outgoing datagram.
    pub(crate) fn register_datagram(
        &mut self,
        resolver: PendingResolver<()>,
    ) -> Result<u64, (PendingResolver<()>, BrokerError)> {
        if let Err(e) = self.require_ready("send a datagram") {
            return Err((resolver, e));
        }
        self.datagrams.register(resolver)
    }

    pub(crate) fn take_datagram(&mut self, id: u64) -> Option<PendingResolver<()>> {
        self.datagrams.complete(id)
    }

    /// Every resolver still held, for shutdown.
    pub(crate) fn drain_all(&mut self, error: &BrokerError) -> Vec<Completion> {
        let mut failed: Vec<Completion> = self
            .creation
            .take()
            .map(|resolver| Completion::Session(resolver, Err(error.clone())))
            .into_iter()
            .collect();
        failed.extend(self.drain_datagrams(error));
        failed
    }

    fn drain_datagrams(&mut self, error: &BrokerError) -> Vec<Completion> {
        self.datagrams
            .drain()
            .into_iter()
            .map(|resolver| Completion::Datagram(resolver, Err(error.clone())))
            .collect()
    }

    pub(crate) fn control(&self) -> Option<ControlChannel> {
        self.control.clone()
    }

    pub(crate) fn release_control(&mut self) -> Option<ControlChannel> {
        self.control.take()
    }

    pub(crate) const fn max_datagram_size(&self) -> Option<u64> {
        self.max_datagram_size
    }

    pub(crate) const fn set_max_datagram_size(&mut self, size: u64) {
        self.max_datagram_size = Some(size);
    }

    pub(crate) const fn record_outbound_stream(&mut self) {
        self.stats.streams_opened_outbound += 1;
    }

    pub(crate) const fn record_inbound_stream(&mut self, accepted: bool) {
        if accepted {
            self.stats.streams_opened_inbound += 1;
        } else {
            self.stats.inbound_streams_dropped += 1;
        }
    }

    pub(crate) const fn record_datagram_outcome(&mut self, sent: bool) {
        if sent {
            self.stats.datagrams_sent += 1;
        } else {
            self.stats.datagrams_failed += 1;
        }
    }

    pub(crate) const fn record_datagram_received(&mut self) {
        self.stats.datagrams_received += 1;
    }

    pub(crate) fn stats(&self) -> BrokerStats {
        BrokerStats {
            state: self.machine.state(),
            datagrams_outstanding: self.datagrams.outstanding(),
            ..self.stats
        }
    }
}
