//! wirecheck-core: the wire half of the wirecheck test harness.
//!
//! ```text
//!   Step ──exec──▶ Correlator ──send──▶ Emulator ──frame──▶ ClientConnection ──▶ SUT
//!                      ▲                   │
//!                      └────receive────────┘◀──decode── FrameDecoder ◀── socket
//! ```
//!
//! - [`frame`]: 4-byte big-endian total-length framing.
//! - [`message`]: the application [`Message`] and the codecs that turn it into frame payloads.
//! - [`transport`]: client and server stream connections with per-connection receive buffers.
//! - [`Emulator`]: binds a named channel to connections and a single message listener.
//! - [`Correlator`]: sends a batch and collects responses into one window under a deadline.

#![forbid(unsafe_code)]

mod correlator;
mod emulator;
mod error;
pub mod frame;
mod message;
pub mod transport;

pub use correlator::*;
pub use emulator::*;
pub use error::*;
pub use frame::{FrameDecoder, encode_frame};
pub use message::*;
