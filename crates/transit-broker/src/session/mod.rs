//! Session lifecycle and request types.

mod state;
mod types;

pub use state::{
    CloseInfo, CloseInitiator, SessionEvent, SessionMachine, SessionState, TransitionError,
};
pub use types::{
    CongestionControl, Principal, ReliabilityMode, SessionOptions, SessionTarget, StreamDirection,
};
