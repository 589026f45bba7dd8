use crate::session::SessionState;

/// Point-in-time counters for one broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerStats {
    pub state: SessionState,
    pub streams_opened_outbound: u64,
    pub streams_opened_inbound: u64,
    /// Incoming streams dropped because their pipes could not be set up.
    pub inbound_streams_dropped: u64,
    pub datagrams_sent: u64,
    pub datagrams_failed: u64,
    pub datagrams_received: u64,
    pub datagrams_outstanding: usize,
}

impl Default for BrokerStats {
    fn default() -> Self {
        Self {
            state: SessionState::Connecting,
            streams_opened_outbound: 0,
            streams_opened_inbound: 0,
            inbound_streams_dropped: 0,
            datagrams_sent: 0,
            datagrams_failed: 0,
            datagrams_received: 0,
            datagrams_outstanding: 0,
        }
    }
}
