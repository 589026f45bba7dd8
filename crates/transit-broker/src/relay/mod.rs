//! Relay module: moves bytes between engine-owned streams and byte pipes.
//!
//! - [`PipeFactory`] creates bounded sender/receiver pipe pairs
//! - [`ByteRelay`] starts one copy task per stream direction

mod byte_relay;
mod pipe;
mod types;

pub use byte_relay::ByteRelay;
pub use pipe::{DuplexPipeFactory, PipeFactory, PipeReceiver, PipeSender};
pub use types::*;
