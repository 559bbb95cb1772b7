//! Emulators: named channels bound to stream connections.
//!
//! An emulator plays one external party in a test. It turns outbound
//! [`Message`]s into frames on its connection and turns inbound frames back
//! into messages for its single registered [`MessageReceiver`].

use std::sync::{Arc, Weak};

use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::transport::{
    ClientConnection, FrameHandler, PeerConnection, PeerFactory, ServerConnection,
};
use crate::{CodecKind, EmulatorError, Message, PayloadCodec, TransportError};

/// Receives decoded messages.
pub trait MessageReceiver: Send + Sync + 'static {
    fn receive(&self, message: Message);
}

/// Sends messages on behalf of a channel.
///
/// Boxed futures keep the trait object-safe so a routing table can hold
/// emulators and test doubles side by side.
pub trait MessageSender: Send + Sync + 'static {
    fn send<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, Result<(), EmulatorError>>;
}

/// How an emulator is wired to the SUT.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmulatorConfig {
    /// Channel name; also stamped on every message this emulator receives.
    pub name: String,
    /// SUT address to dial (`host:port`) for outbound messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect: Option<String>,
    /// Local address to accept SUT connections on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,
    #[serde(default)]
    pub codec: CodecKind,
}

impl EmulatorConfig {
    pub fn client(name: impl Into<String>, connect: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connect: Some(connect.into()),
            ..Self::default()
        }
    }

    pub fn server(name: impl Into<String>, listen: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            listen: Some(listen.into()),
            ..Self::default()
        }
    }

    pub fn with_codec(mut self, codec: CodecKind) -> Self {
        self.codec = codec;
        self
    }
}

/// A named endpoint driving one side of the conversation with the SUT.
///
/// Cheap to clone; clones share connections and the listener slot.
#[derive(Clone)]
pub struct Emulator {
    inner: Arc<EmulatorInner>,
}

impl std::fmt::Debug for Emulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emulator")
            .field("name", &self.inner.name)
            .field("client", &self.inner.client)
            .field("server", &*self.inner.server.lock())
            .finish_non_exhaustive()
    }
}

struct EmulatorInner {
    name: String,
    listen: Option<String>,
    codec: Arc<dyn PayloadCodec>,
    listener: RwLock<Option<Arc<dyn MessageReceiver>>>,
    client: Option<ClientConnection>,
    server: Mutex<Option<ServerConnection>>,
}

impl Emulator {
    pub fn new(config: EmulatorConfig) -> Self {
        let codec = config.codec.build();
        Self::with_codec(config, codec)
    }

    pub fn with_codec(config: EmulatorConfig, codec: Arc<dyn PayloadCodec>) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<EmulatorInner>| {
            let client = config
                .connect
                .map(|remote| ClientConnection::new(remote, inbound_handler(weak.clone())));
            EmulatorInner {
                name: config.name,
                listen: config.listen,
                codec,
                listener: RwLock::new(None),
                client,
                server: Mutex::new(None),
            }
        });
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn client(&self) -> Option<&ClientConnection> {
        self.inner.client.as_ref()
    }

    pub fn server(&self) -> Option<ServerConnection> {
        self.inner.server.lock().clone()
    }

    /// Register the single listener for inbound messages.
    ///
    /// Replaces (and warns about) any listener already registered.
    pub fn on_receive(&self, listener: Arc<dyn MessageReceiver>) {
        if self.inner.listener.write().replace(listener).is_some() {
            tracing::warn!(emulator = %self.inner.name, "replacing an existing message listener");
        }
    }

    /// Bind the listener, if configured. Idempotent.
    ///
    /// Client connections are not dialed here; they connect on first send.
    pub async fn start(&self) -> Result<(), TransportError> {
        let Some(addr) = self.inner.listen.as_deref() else {
            return Ok(());
        };
        if self.inner.server.lock().is_some() {
            return Ok(());
        }

        let weak = Arc::downgrade(&self.inner);
        let on_peer: PeerFactory = Arc::new(move |_peer: PeerConnection| inbound_handler(weak.clone()));
        let server = ServerConnection::bind(addr, on_peer).await?;

        let mut slot = self.inner.server.lock();
        if slot.is_some() {
            // Lost a race with a concurrent start.
            server.shutdown();
        } else {
            tracing::info!(emulator = %self.inner.name, addr = %server.local_addr(), "emulator listening");
            *slot = Some(server);
        }
        Ok(())
    }

    /// Close the listener, its peers and the client socket. Idempotent.
    pub async fn stop(&self) {
        let server = self.inner.server.lock().take();
        if let Some(server) = server {
            server.shutdown();
        }
        if let Some(client) = &self.inner.client {
            client.close().await;
        }
        tracing::debug!(emulator = %self.inner.name, "emulator stopped");
    }

    /// Encode and send `message`.
    ///
    /// Goes through the client connection when one is configured, otherwise
    /// to every peer connected to the listener.
    pub async fn send(&self, message: &Message) -> Result<(), EmulatorError> {
        let name = &self.inner.name;
        let payload = self
            .inner
            .codec
            .encode(message)
            .map_err(|source| EmulatorError::Codec {
                name: name.clone(),
                source,
            })?;
        let transport = |source| EmulatorError::Transport {
            name: name.clone(),
            source,
        };

        if let Some(client) = &self.inner.client {
            client.send(&payload).await.map_err(transport)?;
        } else if self.inner.listen.is_some() {
            let peers = self.server().map(|s| s.peers()).unwrap_or_default();
            if peers.is_empty() {
                return Err(transport(TransportError::NoPeer));
            }
            for peer in peers {
                peer.send(&payload).map_err(transport)?;
            }
        } else {
            return Err(EmulatorError::Unroutable { name: name.clone() });
        }

        tracing::debug!(emulator = %name, len = payload.len(), "message sent");
        Ok(())
    }
}

impl MessageSender for Emulator {
    fn send<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, Result<(), EmulatorError>> {
        Box::pin(Emulator::send(self, message))
    }
}

impl EmulatorInner {
    fn forward(&self, payload: &[u8]) {
        let message = match self.codec.decode(&self.name, payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(emulator = %self.name, error = %e, "dropping undecodable frame");
                return;
            }
        };
        let listener = self.listener.read().clone();
        match listener {
            Some(listener) => listener.receive(message),
            None => tracing::warn!(
                emulator = %self.name,
                ?message,
                "no listener registered (emulator stopped?); dropping message"
            ),
        }
    }
}

fn inbound_handler(emulator: Weak<EmulatorInner>) -> FrameHandler {
    Arc::new(move |payload: Bytes| {
        if let Some(emulator) = emulator.upgrade() {
            emulator.forward(&payload);
        }
    })
}
