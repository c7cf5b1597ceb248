//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::get;
use axum::{middleware, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::gate::{enforce, GateState};
use crate::error::{Result, TurnstileError};
use crate::ratelimit::RateLimiter;

/// Build the application router.
///
/// Everything except `/health` sits behind the rate limiting gate.
pub fn router(gate: GateState) -> Router {
    Router::new()
        .route("/hello", get(hello))
        .route_layer(middleware::from_fn_with_state(gate, enforce))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
}

async fn hello() -> &'static str {
    "Hello, world!"
}

async fn health() -> StatusCode {
    StatusCode::OK
}

/// HTTP server for the rate limited service.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    gate: GateState,
}

impl HttpServer {
    /// Create a new HTTP server; `token_header` names the header carrying API tokens.
    pub fn new(addr: SocketAddr, rate_limiter: Arc<RateLimiter>, token_header: &str) -> Result<Self> {
        let gate = GateState::new(rate_limiter, token_header).map_err(|e| {
            TurnstileError::Config(format!("invalid token header {:?}: {}", token_header, e))
        })?;
        Ok(Self { addr, gate })
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;

        info!(addr = %local_addr, "Starting HTTP server");

        axum::serve(
            listener,
            router(self.gate).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            TurnstileError::Io(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn limiter() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(Arc::new(MemoryStore::new()), 1, 60))
    }

    #[test]
    fn test_server_creation() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        assert!(HttpServer::new(addr, limiter(), "API_KEY").is_ok());
    }

    #[test]
    fn test_server_rejects_invalid_token_header() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let result = HttpServer::new(addr, limiter(), "not a header");
        assert!(matches!(result, Err(TurnstileError::Config(_))));
    }

    async fn get_hello(port: u16) -> String {
        let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .unwrap();
        stream
            .write_all(b"GET /hello HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_serve_limits_by_peer_address_and_shuts_down() {
        // Reserve a free port, then hand it to the server.
        let port = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let addr: SocketAddr = ([127, 0, 0, 1], port).into();
        let server = HttpServer::new(addr, limiter(), "API_KEY").unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve_with_shutdown(async {
            let _ = rx.await;
        }));

        let mut first = String::new();
        for _ in 0..50 {
            if tokio::net::TcpStream::connect(addr).await.is_ok() {
                first = get_hello(port).await;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(first.starts_with("HTTP/1.1 200"), "{}", first);

        let second = get_hello(port).await;
        assert!(second.starts_with("HTTP/1.1 429"), "{}", second);

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
