//! Error types for framing, transports, codecs, emulators and correlation.

use std::io;

/// Framing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The length prefix declared fewer bytes than the header itself.
    #[error("frame length {declared} is smaller than the 4-byte header")]
    LengthTooSmall { declared: u32 },
    /// The payload does not fit a u32 total length.
    #[error("payload of {len} bytes exceeds the maximum frame size")]
    PayloadTooLarge { len: usize },
}

/// Stream connection errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("connection closed")]
    Closed,
    #[error("no connected peer to send to")]
    NoPeer,
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),
}

/// Errors converting between messages and frame payloads.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

/// Emulator send errors.
#[derive(Debug, thiserror::Error)]
pub enum EmulatorError {
    #[error("emulator {name}: {source}")]
    Transport {
        name: String,
        #[source]
        source: TransportError,
    },
    #[error("emulator {name}: {source}")]
    Codec {
        name: String,
        #[source]
        source: CodecError,
    },
    #[error("emulator {name} has neither a remote address nor a listener")]
    Unroutable { name: String },
}

/// Correlator errors.
#[derive(Debug, thiserror::Error)]
pub enum CorrelatorError {
    /// A response window is already open; the correlator is not reentrant.
    #[error("already waiting on responses: a response window is still open")]
    AlreadyWaiting,
    #[error("failed to send on channel {channel}: {source}")]
    Send {
        channel: String,
        #[source]
        source: EmulatorError,
    },
}
