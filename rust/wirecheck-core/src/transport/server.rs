use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{FrameHandler, read_frames};
use crate::{TransportError, encode_frame};

/// Pause after a failed accept, so a persistent error (e.g. out of file
/// descriptors) does not spin the acceptor.
const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Builds the frame handler for a newly accepted peer.
pub type PeerFactory = Arc<dyn Fn(PeerConnection) -> FrameHandler + Send + Sync>;

/// Write side of one accepted peer.
///
/// Sends are queued to a per-peer writer task, so frames go out in the order
/// they were queued and the caller never waits for the socket.
#[derive(Clone, Debug)]
pub struct PeerConnection {
    id: u64,
    addr: SocketAddr,
    outbound: mpsc::UnboundedSender<Bytes>,
}

impl PeerConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Frame `payload` and queue it for this peer.
    pub fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        let frame = encode_frame(payload)?;
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

/// Server role of a stream connection: a listener plus its live peers.
///
/// Cheap to clone; [`shutdown`](Self::shutdown) on any clone closes the
/// listener and every peer.
#[derive(Clone)]
pub struct ServerConnection {
    inner: Arc<ServerInner>,
}

impl std::fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnection")
            .field("local_addr", &self.inner.local_addr)
            .field("peers", &self.inner.peers.lock().len())
            .finish_non_exhaustive()
    }
}

struct ServerInner {
    local_addr: SocketAddr,
    next_peer_id: AtomicU64,
    peers: Mutex<HashMap<u64, PeerEntry>>,
    acceptor: Mutex<Option<JoinHandle<()>>>,
}

struct PeerEntry {
    conn: PeerConnection,
    tasks: Vec<JoinHandle<()>>,
}

impl PeerEntry {
    fn abort(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

impl ServerConnection {
    /// Bind `addr` and start accepting peers.
    ///
    /// `on_peer` is called once per accepted connection and returns the
    /// handler that receives that peer's frames.
    pub async fn bind(addr: &str, on_peer: PeerFactory) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let inner = Arc::new(ServerInner {
            local_addr,
            next_peer_id: AtomicU64::new(1),
            peers: Mutex::new(HashMap::new()),
            acceptor: Mutex::new(None),
        });

        let acceptor = tokio::spawn(accept_loop(listener, Arc::downgrade(&inner), on_peer));
        *inner.acceptor.lock() = Some(acceptor);
        tracing::debug!(%local_addr, "server listening");

        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Peers whose connection is still open.
    pub fn peers(&self) -> Vec<PeerConnection> {
        self.inner
            .peers
            .lock()
            .values()
            .map(|entry| entry.conn.clone())
            .filter(|conn| !conn.is_closed())
            .collect()
    }

    pub fn is_listening(&self) -> bool {
        self.inner.acceptor.lock().is_some()
    }

    /// Close the listener and every live peer. Idempotent.
    pub fn shutdown(&self) {
        if let Some(acceptor) = self.inner.acceptor.lock().take() {
            acceptor.abort();
            tracing::debug!(local_addr = %self.inner.local_addr, "listener closed");
        }
        let peers: Vec<PeerEntry> = self.inner.peers.lock().drain().map(|(_, e)| e).collect();
        for entry in peers {
            tracing::debug!(peer = %entry.conn.addr, "closing peer");
            entry.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    server: std::sync::Weak<ServerInner>,
    on_peer: PeerFactory,
) {
    loop {
        let (stream, addr) = accept_with_backoff(|| listener.accept()).await;
        let Some(server) = server.upgrade() else {
            return;
        };
        server.add_peer(stream, addr, &on_peer);
    }
}

/// Retry `accept` until it succeeds, sleeping [`ACCEPT_BACKOFF`] after each error.
async fn accept_with_backoff<T, F, Fut>(mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return accepted,
            Err(e) => {
                tracing::error!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

impl ServerInner {
    fn add_peer(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr, on_peer: &PeerFactory) {
        let _ = stream.set_nodelay(true);
        let id = self.next_peer_id.fetch_add(1, Ordering::Relaxed);
        let (reader, writer) = stream.into_split();
        let (outbound, queue) = mpsc::unbounded_channel();
        let conn = PeerConnection { id, addr, outbound };
        let handler = on_peer(conn.clone());

        self.peers.lock().insert(
            id,
            PeerEntry {
                conn,
                tasks: Vec::new(),
            },
        );
        tracing::debug!(peer = %addr, id, "peer connected");

        let writer_task = tokio::spawn(write_frames(writer, queue, addr));
        let server = Arc::downgrade(self);
        let reader_task = tokio::spawn(async move {
            match read_frames(reader, addr, &handler).await {
                Ok(()) => tracing::debug!(peer = %addr, id, "peer disconnected"),
                Err(e) => tracing::warn!(peer = %addr, id, error = %e, "peer connection failed"),
            }
            if let Some(server) = server.upgrade()
                && let Some(entry) = server.peers.lock().remove(&id)
            {
                entry.abort();
            }
        });

        // The reader may already have finished and removed the entry.
        if let Some(entry) = self.peers.lock().get_mut(&id) {
            entry.tasks.push(writer_task);
            entry.tasks.push(reader_task);
        } else {
            writer_task.abort();
        }
    }
}

impl Drop for ServerInner {
    fn drop(&mut self) {
        if let Some(acceptor) = self.acceptor.get_mut().take() {
            acceptor.abort();
        }
        for (_, entry) in self.peers.get_mut().drain() {
            entry.abort();
        }
    }
}

async fn write_frames(
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::UnboundedReceiver<Bytes>,
    peer: SocketAddr,
) {
    while let Some(frame) = queue.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            tracing::warn!(%peer, error = %e, "write to peer failed");
            return;
        }
    }
    let _ = writer.shutdown().await;
}
