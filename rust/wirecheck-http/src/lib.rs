//! HTTP trigger for a running [`Harness`].
//!
//! - `POST /run` takes a scenario document (`{ "scenarios": [...] }`), runs it
//!   and answers with the JSON [`Summary`](wirecheck::report::Summary).
//!   Malformed bodies get `400`, documents that do not build (unknown
//!   channel, invalid expectation) get `422`.
//! - `GET /health` answers `ok`.
//!
//! Runs are serialized: the correlator holds one response window at a time,
//! so a second request waits for the first to finish.

#![deny(unsafe_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use http::StatusCode;
use http_body::Body;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tower_service::Service;
use wirecheck::report::Summary;
use wirecheck::{Harness, ScenarioSet};

/// Pause after a failed accept before trying again.
pub const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Shared state of the trigger endpoints.
#[derive(Clone)]
pub struct AppState {
    harness: Arc<Harness>,
    gate: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(harness: Arc<Harness>) -> Self {
        Self {
            harness,
            gate: Arc::new(Mutex::new(())),
        }
    }
}

/// Routes for the trigger.
pub fn router(harness: Arc<Harness>) -> Router {
    Router::new()
        .route("/run", post(run_scenarios))
        .route("/health", get(health))
        .with_state(AppState::new(harness))
}

async fn health() -> &'static str {
    "ok"
}

async fn run_scenarios(State(state): State<AppState>, body: Bytes) -> Response {
    let scenarios: ScenarioSet = match serde_json::from_slice(&body) {
        Ok(scenarios) => scenarios,
        Err(e) => return error(StatusCode::BAD_REQUEST, format!("invalid request body: {e}")),
    };

    let _run = state.gate.lock().await;
    tracing::info!(scenarios = scenarios.scenarios.len(), "running scenarios");
    match state.harness.run(&scenarios).await {
        Ok(result) => {
            tracing::info!(result = %result.result_type, "scenarios finished");
            match serde_json::to_value(Summary::new(&result)) {
                Ok(summary) => (StatusCode::OK, axum::Json(summary)).into_response(),
                Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            }
        }
        Err(e) => error(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
    }
}

fn error(status: StatusCode, message: String) -> Response {
    tracing::debug!(%status, %message, "rejecting request");
    (status, axum::Json(serde_json::json!({ "error": message }))).into_response()
}

/// Serve HTTP requests on `listener` with `service` until the task is dropped.
pub async fn serve<S, B>(listener: TcpListener, service: S) -> std::io::Result<()>
where
    S: Service<http::Request<Incoming>, Response = http::Response<B>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    serve_with_shutdown(listener, service, std::future::pending()).await
}

/// Like [`serve`], but stops accepting once `shutdown` resolves and then
/// returns, closing the listener. Connections already accepted run to
/// completion on their own tasks.
///
/// Accept errors are retried after [`ACCEPT_BACKOFF`].
pub async fn serve_with_shutdown<S, B, F>(
    listener: TcpListener,
    service: S,
    shutdown: F,
) -> std::io::Result<()>
where
    S: Service<http::Request<Incoming>, Response = http::Response<B>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    F: Future<Output = ()>,
{
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "HTTP trigger listening");

    let mut shutdown = pin!(shutdown);
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            () = &mut shutdown => break,
        };
        match accepted {
            Ok((stream, remote)) => spawn_connection(stream, remote, service.clone()),
            Err(e) => {
                tracing::warn!(error = %e, "accept failed; retrying");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
    tracing::info!(%addr, "HTTP trigger stopped");
    Ok(())
}

fn spawn_connection<S, B>(stream: TcpStream, remote: SocketAddr, service: S)
where
    S: Service<http::Request<Incoming>, Response = http::Response<B>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    tokio::spawn(async move {
        let io = TokioIo::new(stream);
        let service = TowerToHyperService::new(service);
        if let Err(e) = Builder::new(TokioExecutor::new())
            .serve_connection(io, service)
            .await
        {
            tracing::debug!(%remote, error = %e, "HTTP connection ended with error");
        }
    });
}
