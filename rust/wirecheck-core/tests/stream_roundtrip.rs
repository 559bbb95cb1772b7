//! Loopback TCP tests for client/server stream connections, emulators and
//! the correlator.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use wirecheck_core::transport::{
    ClientConnection, ConnectionState, FrameHandler, PeerConnection, PeerFactory, ServerConnection,
};
use wirecheck_core::{
    Correlator, Emulator, EmulatorConfig, FrameDecoder, Message, TransportError, encode_frame,
};

const WAIT: Duration = Duration::from_secs(5);

/// A server that answers every frame with its text uppercased.
async fn uppercase_server() -> ServerConnection {
    let on_peer: PeerFactory = Arc::new(|peer: PeerConnection| {
        let handler: FrameHandler = Arc::new(move |payload: Bytes| {
            let text = String::from_utf8_lossy(&payload).to_uppercase();
            peer.send(text.as_bytes()).expect("peer send failed");
        });
        handler
    });
    ServerConnection::bind("127.0.0.1:0", on_peer)
        .await
        .expect("bind failed")
}

fn channel_handler() -> (FrameHandler, mpsc::UnboundedReceiver<Bytes>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler: FrameHandler = Arc::new(move |payload| {
        let _ = tx.send(payload);
    });
    (handler, rx)
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<Bytes>) -> Bytes {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("handler channel closed")
}

async fn wait_for_state(client: &ClientConnection, state: ConnectionState) {
    tokio::time::timeout(WAIT, async {
        while client.state() != state {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("client never reached the expected state");
}

/// Read one frame off a raw socket.
async fn read_one_frame(stream: &mut TcpStream) -> Bytes {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 256];
    loop {
        if let Some(frame) = decoder.next_frame().expect("bad frame") {
            return frame;
        }
        let n = stream.read(&mut buf).await.expect("read failed");
        assert!(n > 0, "socket closed before a full frame arrived");
        decoder.extend(&buf[..n]);
    }
}

#[tokio::test]
async fn client_connects_lazily_and_receives_replies() {
    let server = uppercase_server().await;
    let (handler, mut rx) = channel_handler();
    let client = ClientConnection::new(server.local_addr().to_string(), handler);
    assert_eq!(client.state(), ConnectionState::Disconnected);

    client.send(b"Hello world!").await.expect("send failed");
    assert_eq!(client.state(), ConnectionState::Connected);
    client.send(b"again").await.expect("send failed");

    assert_eq!(recv(&mut rx).await, Bytes::from_static(b"HELLO WORLD!"));
    assert_eq!(recv(&mut rx).await, Bytes::from_static(b"AGAIN"));

    client.close().await;
    server.shutdown();
}

#[tokio::test]
async fn server_decodes_frames_split_across_writes() {
    let (handler, mut rx) = channel_handler();
    let on_peer: PeerFactory = Arc::new(move |_peer: PeerConnection| handler.clone());
    let server = ServerConnection::bind("127.0.0.1:0", on_peer)
        .await
        .expect("bind failed");

    let mut wire = encode_frame(b"first").expect("encode").to_vec();
    wire.extend_from_slice(&encode_frame(b"").expect("encode"));
    wire.extend_from_slice(&encode_frame(b"third frame").expect("encode"));

    let mut stream = TcpStream::connect(server.local_addr())
        .await
        .expect("connect failed");
    stream.set_nodelay(true).expect("nodelay");
    for chunk in wire.chunks(3) {
        stream.write_all(chunk).await.expect("write failed");
        stream.flush().await.expect("flush failed");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    assert_eq!(recv(&mut rx).await, Bytes::from_static(b"first"));
    assert_eq!(recv(&mut rx).await, Bytes::new());
    assert_eq!(recv(&mut rx).await, Bytes::from_static(b"third frame"));
    server.shutdown();
}

#[tokio::test]
async fn server_delivers_several_frames_from_one_write() {
    let (handler, mut rx) = channel_handler();
    let on_peer: PeerFactory = Arc::new(move |_peer: PeerConnection| handler.clone());
    let server = ServerConnection::bind("127.0.0.1:0", on_peer)
        .await
        .expect("bind failed");

    let mut wire = encode_frame(b"one").expect("encode").to_vec();
    wire.extend_from_slice(&encode_frame(b"two").expect("encode"));
    let mut stream = TcpStream::connect(server.local_addr())
        .await
        .expect("connect failed");
    stream.write_all(&wire).await.expect("write failed");

    assert_eq!(recv(&mut rx).await, Bytes::from_static(b"one"));
    assert_eq!(recv(&mut rx).await, Bytes::from_static(b"two"));
    server.shutdown();
}

#[tokio::test]
async fn client_reconnects_after_the_remote_closes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (handler, _rx) = channel_handler();
    let client = ClientConnection::new(addr.to_string(), handler);

    client.send(b"one").await.expect("first send failed");
    let (mut first, _) = listener.accept().await.expect("accept");
    assert_eq!(read_one_frame(&mut first).await, Bytes::from_static(b"one"));
    drop(first);

    wait_for_state(&client, ConnectionState::Disconnected).await;

    client.send(b"two").await.expect("send after close failed");
    let (mut second, _) = tokio::time::timeout(WAIT, listener.accept())
        .await
        .expect("client did not reconnect")
        .expect("accept");
    assert_eq!(read_one_frame(&mut second).await, Bytes::from_static(b"two"));
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn connect_failure_rejects_the_send() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        listener.local_addr().expect("local addr")
    };
    let (handler, _rx) = channel_handler();
    let client = ClientConnection::new(addr.to_string(), handler);

    let err = client.send(b"nobody home").await.unwrap_err();
    assert!(matches!(err, TransportError::Connect { .. }), "got {err:?}");
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn concurrent_peers_get_only_their_own_replies() {
    let server = uppercase_server().await;
    let mut alpha = TcpStream::connect(server.local_addr())
        .await
        .expect("connect failed");
    let mut beta = TcpStream::connect(server.local_addr())
        .await
        .expect("connect failed");
    alpha.set_nodelay(true).expect("nodelay");
    beta.set_nodelay(true).expect("nodelay");

    for round in 0..3 {
        let a = encode_frame(format!("alpha {round}").as_bytes()).expect("encode");
        let b = encode_frame(format!("beta {round}").as_bytes()).expect("encode");
        let (a_head, a_tail) = a.split_at(3);
        let (b_head, b_tail) = b.split_at(5);
        alpha.write_all(a_head).await.expect("write failed");
        beta.write_all(b_head).await.expect("write failed");
        tokio::time::sleep(Duration::from_millis(1)).await;
        beta.write_all(b_tail).await.expect("write failed");
        alpha.write_all(a_tail).await.expect("write failed");

        assert_eq!(
            read_one_frame(&mut beta).await,
            Bytes::from(format!("BETA {round}"))
        );
        assert_eq!(
            read_one_frame(&mut alpha).await,
            Bytes::from(format!("ALPHA {round}"))
        );
    }
    assert_eq!(server.peers().len(), 2);

    drop(alpha);
    tokio::time::timeout(WAIT, async {
        while server.peers().len() != 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("closed peer was never removed");

    beta.write_all(&encode_frame(b"still here").expect("encode"))
        .await
        .expect("write failed");
    assert_eq!(
        read_one_frame(&mut beta).await,
        Bytes::from_static(b"STILL HERE")
    );
    server.shutdown();
}

#[tokio::test]
async fn shutdown_closes_listener_and_peers() {
    let server = uppercase_server().await;
    let (handler, mut rx) = channel_handler();
    let client = ClientConnection::new(server.local_addr().to_string(), handler);
    client.send(b"ping").await.expect("send failed");
    assert_eq!(recv(&mut rx).await, Bytes::from_static(b"PING"));
    assert_eq!(server.peers().len(), 1);

    server.shutdown();
    server.shutdown();

    assert!(!server.is_listening());
    assert!(server.peers().is_empty());
    wait_for_state(&client, ConnectionState::Disconnected).await;
}

#[tokio::test]
async fn correlator_collects_uppercased_reply() {
    let server = uppercase_server().await;
    let emulator = Emulator::new(EmulatorConfig::client(
        "EM1",
        server.local_addr().to_string(),
    ));
    let correlator = Arc::new(Correlator::new(Duration::from_secs(2)));
    correlator.attach(&emulator);
    emulator.start().await.expect("start failed");

    let responses = correlator
        .exec(&[Message::with_content("EM1", "Hello world!")], 1, None)
        .await
        .expect("exec failed");

    assert_eq!(responses, vec![Message::with_content("EM1", "HELLO WORLD!")]);
    emulator.stop().await;
    server.shutdown();
}

#[tokio::test]
async fn listening_emulator_replies_to_connected_peer() {
    let emulator = Emulator::new(EmulatorConfig::server("SRV", "127.0.0.1:0"));
    let correlator = Arc::new(Correlator::new(Duration::from_secs(2)));
    correlator.attach(&emulator);
    emulator.start().await.expect("start failed");
    emulator.start().await.expect("second start failed");
    let addr = emulator.server().expect("listening").local_addr();

    let mut sut = TcpStream::connect(addr).await.expect("connect failed");
    tokio::time::timeout(WAIT, async {
        while emulator.server().is_some_and(|s| s.peers().is_empty()) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("peer never registered");

    let request = [Message::with_content("SRV", "status?")];
    let exec = correlator.exec(&request, 1, None);
    let sut_side = async {
        let request = read_one_frame(&mut sut).await;
        assert_eq!(request, Bytes::from_static(b"status?"));
        let reply = encode_frame(b"OK").expect("encode");
        sut.write_all(&reply).await.expect("write failed");
    };
    let (responses, ()) = tokio::join!(exec, sut_side);

    assert_eq!(
        responses.expect("exec failed"),
        vec![Message::with_content("SRV", "OK")]
    );
    emulator.stop().await;
}
