//! Request handling.
//!
//! # Responsibilities
//! - Generate a unique request ID (UUID v4) unless the caller sent one
//! - Build the per-request context carried through the pipeline
//! - Record request metrics once the response is known
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - The context lives in request extensions; later stages fill in identity and key

use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderName, HeaderValue, Method, Request},
    middleware::Next,
    response::Response,
};
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

use crate::http::server::AppState;
use crate::observability::metrics;
use crate::routing::ServiceName;
use crate::security::headers::first_forwarded_for;
use crate::security::identity::{CallerIdentity, RateLimitKey};

pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Request ID generator for `SetRequestIdLayer`.
#[derive(Clone, Copy, Debug, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Per-request data carried through the pipeline.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub request_id: String,
    pub method: Method,
    pub path: String,
    pub client_addr: Option<IpAddr>,
    pub service: ServiceName,
    /// Set by the identity stage.
    pub identity: Option<CallerIdentity>,
    /// Set by the rate-limit stage.
    pub rate_limit_key: Option<RateLimitKey>,
    pub started_at: Instant,
}

/// First pipeline stage: classify the request and attach its context.
pub async fn context_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let started_at = Instant::now();

    let request_id = request
        .headers()
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let client_addr = if state.config.identity.trust_forwarded_for {
        first_forwarded_for(request.headers()).or(peer)
    } else {
        peer
    };

    let path = request.uri().path().to_string();
    let service = state.classifier.classify(&path);
    let method = request.method().clone();

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %path,
        service = %service,
        "Gateway request"
    );

    request.extensions_mut().insert(RequestContext {
        request_id: request_id.clone(),
        method: method.clone(),
        path,
        client_addr,
        service: service.clone(),
        identity: None,
        rate_limit_key: None,
        started_at,
    });

    let response = next.run(request).await;

    let status = response.status();
    metrics::record_request(method.as_str(), status.as_u16(), service.as_str(), started_at);
    tracing::debug!(
        request_id = %request_id,
        status = status.as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "Gateway response"
    );

    response
}
