//! Request gate: the HTTP middleware in front of protected routes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{HeaderName, InvalidHeaderName, RETRY_AFTER};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, error, instrument, warn};

use crate::ratelimit::{Decision, RateLimitError, RateLimiter};

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// Shared state of the gate middleware.
#[derive(Debug, Clone)]
pub struct GateState {
    limiter: Arc<RateLimiter>,
    token_header: HeaderName,
}

impl GateState {
    /// Create the gate state; `token_header` names the header carrying the API token.
    pub fn new(limiter: Arc<RateLimiter>, token_header: &str) -> Result<Self, InvalidHeaderName> {
        Ok(Self {
            limiter,
            token_header: HeaderName::from_bytes(token_header.as_bytes())?,
        })
    }
}

/// Best-effort client address: the first `X-Forwarded-For` hop, else the peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    match forwarded {
        Some(ip) => ip.to_string(),
        None => peer.map(|addr| addr.ip().to_string()).unwrap_or_default(),
    }
}

/// Admit or reject a request based on its identity's quota.
#[instrument(
    skip_all,
    fields(method = %request.method(), path = %request.uri().path())
)]
pub async fn enforce(State(gate): State<GateState>, request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(request.headers(), peer);
    let token = match request.headers().get(&gate.token_header).map(|v| v.to_str()) {
        None => String::new(),
        Some(Ok(token)) => token.to_string(),
        Some(Err(_)) => {
            warn!(header = %gate.token_header, "Rejecting request with a non-ASCII token");
            return (StatusCode::BAD_REQUEST, "invalid token header").into_response();
        }
    };

    if ip.is_empty() && token.is_empty() {
        warn!("Rejecting request without token or client address");
        return missing_identity();
    }

    match gate.limiter.check(&ip, &token).await {
        Ok(decision) if decision.allowed => {
            let mut response = next.run(request).await;
            insert_quota_headers(response.headers_mut(), &decision);
            response
        }
        Ok(decision) => {
            debug!(ttl = decision.ttl_seconds, "Request rejected by rate limit");
            let mut response =
                (StatusCode::TOO_MANY_REQUESTS, decision.message.clone()).into_response();
            let headers = response.headers_mut();
            insert_quota_headers(headers, &decision);
            headers.insert(RETRY_AFTER, HeaderValue::from(decision.ttl_seconds));
            response
        }
        Err(RateLimitError::MissingIdentity) => missing_identity(),
        Err(e) => {
            error!(error = %e, "Error checking rate limit");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal limiter error").into_response()
        }
    }
}

fn missing_identity() -> Response {
    (StatusCode::BAD_REQUEST, "missing client identity").into_response()
}

fn insert_quota_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.ttl_seconds));
}
