//! A tiny system under test for trying wirecheck locally.
//!
//! Listens for length-framed connections and answers every frame with the
//! same bytes uppercased, on the same connection.
//!
//! ```bash
//! cargo run -p uppercase-sut -- --addr 127.0.0.1:9000
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use bytes::Bytes;
use clap::Parser;
use wirecheck_core::transport::{FrameHandler, PeerConnection, PeerFactory, ServerConnection};

#[derive(Parser, Debug)]
#[command(name = "uppercase-sut")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "UPPERCASE_SUT_ADDR", default_value = "127.0.0.1:9000")]
    addr: String,
}

fn uppercase(peer: PeerConnection) -> FrameHandler {
    Arc::new(move |payload: Bytes| {
        let reply = String::from_utf8_lossy(&payload).to_uppercase();
        if let Err(e) = peer.send(reply.as_bytes()) {
            tracing::warn!(peer = %peer.addr(), error = %e, "reply failed");
        }
    })
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let on_peer: PeerFactory = Arc::new(uppercase);
    let server = match ServerConnection::bind(&args.addr, on_peer).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(addr = %args.addr, error = %e, "bind failed");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(addr = %server.local_addr(), "uppercase SUT listening");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "waiting for Ctrl+C failed");
    }
    server.shutdown();
    ExitCode::SUCCESS
}
