//! Transit Session Broker
//!
//! Brokers one WebTransport-style session between a control plane and a
//! native transport engine:
//! - Exactly-once resolution of session, stream and datagram requests
//! - Engine work confined to one context, resolvers to another
//! - Engine streams exposed to the control plane as bounded byte pipes
//! - Explicit session state machine

pub mod broker;
pub mod control;
pub mod engine;
pub mod error;
pub mod relay;
pub mod resolver;
pub mod session;

pub use broker::{BrokerConfig, BrokerStats, SessionBroker};
pub use control::{
    BidirectionalPipes, ControlChannel, CreateSessionRequest, CreateSessionResponse, Notification,
};
pub use engine::{LoopbackEngine, SessionEventListener, StreamCallback, TransportEngine};
pub use error::{BrokerError, BrokerResult, ErrorKind};
pub use relay::{PipeReceiver, PipeSender};
pub use resolver::{PendingResolver, ResolverReceiver};
pub use session::{
    CongestionControl, Principal, ReliabilityMode, SessionOptions, SessionState, StreamDirection,
};
