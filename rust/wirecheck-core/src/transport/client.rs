use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use super::{FrameHandler, read_frames};
use crate::{TransportError, encode_frame};

/// Observable state of a [`ClientConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Client role of a stream connection.
///
/// Cheap to clone; clones share the same socket.
#[derive(Clone)]
pub struct ClientConnection {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("remote", &self.inner.remote)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

struct ClientInner {
    remote: String,
    handler: FrameHandler,
    state: Mutex<StateCell>,
    live: AsyncMutex<Option<LiveStream>>,
}

/// Connection state tagged with the socket it describes.
///
/// A reader task only reports `Disconnected` for its own generation, so a
/// socket that ends after a reconnect cannot mask the newer one.
struct StateCell {
    state: ConnectionState,
    generation: u64,
}

/// An established socket: the write half plus the task reading the other half.
struct LiveStream {
    writer: OwnedWriteHalf,
    closed: Arc<AtomicBool>,
    /// Set while a frame is being written; still set after a cancelled write.
    torn: bool,
    reader: JoinHandle<()>,
}

impl LiveStream {
    fn is_closed(&self) -> bool {
        self.torn || self.closed.load(Ordering::Acquire)
    }
}

impl Drop for LiveStream {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl ClientInner {
    fn reader_finished(&self, generation: u64) {
        let mut cell = self.state.lock();
        if cell.generation == generation {
            cell.state = ConnectionState::Disconnected;
        }
    }
}

impl ClientConnection {
    /// Create a disconnected client for `remote` (`host:port`).
    ///
    /// Nothing is dialed until the first [`send`](Self::send).
    pub fn new(remote: impl Into<String>, handler: FrameHandler) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                remote: remote.into(),
                handler,
                state: Mutex::new(StateCell {
                    state: ConnectionState::Disconnected,
                    generation: 0,
                }),
                live: AsyncMutex::new(None),
            }),
        }
    }

    pub fn remote(&self) -> &str {
        &self.inner.remote
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().state
    }

    /// Frame `payload` and write it, connecting first if needed.
    ///
    /// A connect failure rejects this send and leaves the client
    /// `Disconnected`; the next send dials again. A send cancelled halfway
    /// through a frame poisons the socket, so the next send reconnects
    /// instead of continuing a partial frame.
    pub async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        let frame = encode_frame(payload)?;

        let mut live = self.inner.live.lock().await;
        if live.as_ref().is_some_and(LiveStream::is_closed) {
            live.take();
            tracing::debug!(remote = %self.inner.remote, "socket closed; reconnecting");
        }
        if live.is_none() {
            *live = Some(self.connect().await?);
        }
        let Some(stream) = live.as_mut() else {
            return Err(TransportError::Closed);
        };

        stream.torn = true;
        if let Err(e) = stream.writer.write_all(&frame).await {
            tracing::warn!(remote = %self.inner.remote, error = %e, "write failed; dropping connection");
            *live = None;
            self.set_state(ConnectionState::Disconnected);
            return Err(TransportError::Io(e));
        }
        stream.torn = false;
        tracing::trace!(remote = %self.inner.remote, len = payload.len(), "frame sent");
        Ok(())
    }

    /// Close the socket, if any. The next send reconnects.
    pub async fn close(&self) {
        let mut live = self.inner.live.lock().await;
        if let Some(mut stream) = live.take() {
            let _ = stream.writer.shutdown().await;
            tracing::debug!(remote = %self.inner.remote, "client connection closed");
        }
        self.set_state(ConnectionState::Disconnected);
    }

    async fn connect(&self) -> Result<LiveStream, TransportError> {
        let remote = &self.inner.remote;
        self.set_state(ConnectionState::Connecting);

        let stream = match TcpStream::connect(remote.as_str()).await {
            Ok(stream) => stream,
            Err(source) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(TransportError::Connect {
                    addr: remote.clone(),
                    source,
                });
            }
        };
        let _ = stream.set_nodelay(true);
        let peer = match stream.peer_addr() {
            Ok(peer) => peer,
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(TransportError::Io(e));
            }
        };
        let (reader, writer) = stream.into_split();

        let generation = {
            let mut cell = self.inner.state.lock();
            cell.generation += 1;
            cell.state = ConnectionState::Connected;
            cell.generation
        };
        let closed = Arc::new(AtomicBool::new(false));
        let reader = {
            let closed = closed.clone();
            let handler = self.inner.handler.clone();
            let inner = Arc::downgrade(&self.inner);
            tokio::spawn(async move {
                if let Err(e) = read_frames(reader, peer, &handler).await {
                    tracing::warn!(%peer, error = %e, "client connection failed");
                } else {
                    tracing::debug!(%peer, "server closed the connection");
                }
                closed.store(true, Ordering::Release);
                if let Some(inner) = inner.upgrade() {
                    inner.reader_finished(generation);
                }
            })
        };

        tracing::debug!(%peer, "client connected");
        Ok(LiveStream {
            writer,
            closed,
            torn: false,
            reader,
        })
    }

    fn set_state(&self, state: ConnectionState) {
        self.inner.state.lock().state = state;
    }
}
