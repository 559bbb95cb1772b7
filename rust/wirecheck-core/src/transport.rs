//! Stream connections over TCP.
//!
//! Both roles share the same receive path: every chunk read from the socket is
//! appended to the connection's own [`FrameDecoder`], which is drained until it
//! needs more bytes. Each decoded payload is handed to the connection's
//! [`FrameHandler`] synchronously, in arrival order.
//!
//! - [`ClientConnection`]: connects lazily on the first send and reconnects on
//!   the next send after the socket closes. No other retries.
//! - [`ServerConnection`]: accepts any number of peers, each with its own
//!   buffer and handler, torn down independently.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::TransportError;
use crate::frame::FrameDecoder;

mod client;
mod server;

pub use client::*;
pub use server::*;

/// Callback invoked once per decoded frame payload.
pub type FrameHandler = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Read buffer size for a single socket read.
const READ_CHUNK: usize = 8 * 1024;

/// Pump `reader` through a fresh decoder until EOF or an error.
async fn read_frames<R>(
    mut reader: R,
    peer: SocketAddr,
    handler: &FrameHandler,
) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut decoder = FrameDecoder::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            if decoder.buffered() > 0 {
                tracing::warn!(
                    %peer,
                    buffered = decoder.buffered(),
                    "connection closed with a partial frame buffered"
                );
            }
            return Ok(());
        }
        let delivered = decoder.feed(&chunk[..n], |payload| handler(payload))?;
        tracing::trace!(%peer, read = n, delivered, "processed chunk");
    }
}
