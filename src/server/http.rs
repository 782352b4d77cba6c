//! Health and metrics HTTP server
//!
//! Uses hyper http1 with TokioIo for async handling. This server stays up
//! for the whole process lifetime, including graceful shutdown, so liveness
//! probes keep passing while the bus connection drains.

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::check::CheckMetrics;
use crate::config::Args;
use crate::nats::NatsClient;
use crate::types::{Result, WardenError};

/// Shared state for the health server
pub struct AppState {
    pub args: Args,
    pub nats: NatsClient,
    pub metrics: Arc<CheckMetrics>,
}

/// Run the health/metrics listener until the process exits
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen)
        .await
        .map_err(|e| WardenError::Config(format!("failed to bind {}: {}", state.args.listen, e)))?;

    info!("Health server listening on {}", state.args.listen);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let io = TokioIo::new(stream);
                let state = Arc::clone(&state);

                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, req).await }
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    req: Request<hyper::body::Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match (req.method(), req.uri().path()) {
        // Liveness probe: returns 200 as long as the process runs. The
        // service self-terminates on non-recoverable errors, so liveness
        // does not inspect dependencies.
        (&Method::GET, "/livez") | (&Method::GET, "/healthz") => text_response(StatusCode::OK, "OK\n"),

        // Readiness probe: requires a live bus connection.
        (&Method::GET, "/readyz") | (&Method::GET, "/ready") => {
            if state.nats.is_connected() {
                text_response(StatusCode::OK, "OK\n")
            } else {
                text_response(StatusCode::SERVICE_UNAVAILABLE, "NATS connection not ready\n")
            }
        }

        // Cache counters as JSON.
        (&Method::GET, "/metrics") => {
            let body = serde_json::to_string(&state.metrics.snapshot())
                .unwrap_or_else(|_| "{}".to_string());
            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "application/json")
                .body(Full::new(Bytes::from(body)))
                .unwrap()
        }

        _ => text_response(StatusCode::NOT_FOUND, "not found\n"),
    };

    Ok(response)
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "text/plain")
        .body(Full::new(Bytes::from_static(body.as_bytes())))
        .unwrap()
}
