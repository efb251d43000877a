//! Upstream request forwarding.
//!
//! # Responsibilities
//! - Rewrite the inbound request for the resolved upstream
//! - Bound the whole upstream exchange (head and body) with one timeout
//! - Classify transport failures for the circuit breaker
//!
//! # Design Decisions
//! - No retries: a failing upstream is not hammered from inside a request
//! - Upstream 4xx/5xx are responses, not transport failures
//! - Response bodies are buffered under the same deadline, so a stalled body
//!   is a timeout failure rather than a response left pending

use std::net::IpAddr;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    http::{header, request, HeaderValue, Request, Response},
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;
use tokio::time;

use crate::config::TimeoutConfig;
use crate::http::request::X_REQUEST_ID;
use crate::security::headers::{append_forwarded_for, strip_hop_by_hop};
use crate::upstream::registry::Upstream;
use crate::upstream::FailureKind;

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),

    #[error("upstream request failed: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),

    #[error("upstream response body failed: {0}")]
    Body(#[source] axum::Error),

    #[error("could not build upstream request: {0}")]
    InvalidTarget(#[from] axum::http::Error),
}

impl ForwardError {
    /// Breaker-relevant failure kind; `None` when no upstream call was made.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            ForwardError::Timeout(_) => Some(FailureKind::Timeout),
            ForwardError::Transport(_) | ForwardError::Body(_) => Some(FailureKind::Transport),
            ForwardError::InvalidTarget(_) => None,
        }
    }
}

/// Per-request facts the forwarder copies onto the outbound request.
#[derive(Debug, Clone, Copy)]
pub struct ForwardMeta<'a> {
    pub request_id: &'a str,
    pub client_addr: Option<IpAddr>,
}

/// HTTP client wrapper that forwards requests to upstream services.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: Client<HttpConnector, Body>,
    upstream_timeout: Duration,
}

impl Forwarder {
    pub fn new(timeouts: &TimeoutConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(timeouts.connect_secs)));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            client,
            upstream_timeout: Duration::from_secs(timeouts.upstream_secs),
        }
    }

    pub fn with_timeout(mut self, upstream_timeout: Duration) -> Self {
        self.upstream_timeout = upstream_timeout;
        self
    }

    pub fn upstream_timeout(&self) -> Duration {
        self.upstream_timeout
    }

    /// Send one request to `upstream` and return its response verbatim.
    ///
    /// The timeout covers the full response, body included. Dropping the
    /// returned future aborts the upstream call.
    pub async fn forward(
        &self,
        upstream: &Upstream,
        parts: request::Parts,
        body: Bytes,
        meta: ForwardMeta<'_>,
    ) -> Result<Response<Body>, ForwardError> {
        let outbound = build_outbound(upstream, parts, body, meta)?;

        let exchange = async {
            let response = self.client.request(outbound).await?;
            let (parts, body) = response.into_parts();
            let bytes = axum::body::to_bytes(Body::new(body), usize::MAX)
                .await
                .map_err(ForwardError::Body)?;
            Ok::<_, ForwardError>((parts, bytes))
        };

        let (mut parts, bytes) = match time::timeout(self.upstream_timeout, exchange).await {
            Ok(result) => result?,
            Err(_) => return Err(ForwardError::Timeout(self.upstream_timeout)),
        };

        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, Body::from(bytes)))
    }
}

fn build_outbound(
    upstream: &Upstream,
    parts: request::Parts,
    body: Bytes,
    meta: ForwardMeta<'_>,
) -> Result<Request<Body>, ForwardError> {
    let uri = upstream.target_uri(parts.uri.path_and_query())?;

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    let host = HeaderValue::from_str(&upstream.authority).map_err(axum::http::Error::from)?;
    headers.insert(header::HOST, host);
    if let Some(client) = meta.client_addr {
        append_forwarded_for(&mut headers, client);
    }
    if let Ok(id) = HeaderValue::from_str(meta.request_id) {
        headers.insert(X_REQUEST_ID.clone(), id);
    }

    let mut outbound = Request::builder()
        .method(parts.method)
        .uri(uri)
        .body(Body::from(body))?;
    *outbound.headers_mut() = headers;
    Ok(outbound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::ServiceName;
    use axum::http::Method;
    use url::Url;

    fn upstream(url: &str) -> Upstream {
        Upstream::new(ServiceName::new("restaurant-service"), Url::parse(url).unwrap()).unwrap()
    }

    #[test]
    fn test_build_outbound_rewrites_headers() {
        let inbound = Request::builder()
            .method(Method::POST)
            .uri("/restaurants/1/reviews?draft=true")
            .header(header::HOST, "gateway.example")
            .header(header::CONNECTION, "keep-alive")
            .header("keep-alive", "timeout=5")
            .header("x-forwarded-for", "203.0.113.9")
            .header("authorization", "Bearer t")
            .body(())
            .unwrap();
        let (parts, _) = inbound.into_parts();

        let outbound = build_outbound(
            &upstream("http://restaurant-service:8002"),
            parts,
            Bytes::from_static(b"{\"stars\":5}"),
            ForwardMeta {
                request_id: "req-1",
                client_addr: Some("10.0.0.5".parse().unwrap()),
            },
        )
        .unwrap();

        assert_eq!(outbound.method(), Method::POST);
        assert_eq!(
            outbound.uri().to_string(),
            "http://restaurant-service:8002/restaurants/1/reviews?draft=true"
        );
        let headers = outbound.headers();
        assert_eq!(headers[header::HOST], "restaurant-service:8002");
        assert_eq!(headers["x-forwarded-for"], "203.0.113.9, 10.0.0.5");
        assert_eq!(headers["x-request-id"], "req-1");
        assert_eq!(headers["authorization"], "Bearer t");
        assert!(headers.get(header::CONNECTION).is_none());
        assert!(headers.get("keep-alive").is_none());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_failure() {
        // Bind then drop to get a port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let forwarder = Forwarder::new(&TimeoutConfig::default());
        let (parts, _) = Request::builder().uri("/auth/login").body(()).unwrap().into_parts();
        let err = forwarder
            .forward(
                &upstream(&format!("http://{}", addr)),
                parts,
                Bytes::new(),
                ForwardMeta {
                    request_id: "req-2",
                    client_addr: None,
                },
            )
            .await
            .unwrap_err();

        assert_eq!(err.failure_kind(), Some(FailureKind::Transport));
    }

    #[tokio::test]
    async fn test_silent_upstream_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and never answer.
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let forwarder =
            Forwarder::new(&TimeoutConfig::default()).with_timeout(Duration::from_millis(150));
        let (parts, _) = Request::builder().uri("/reviews").body(()).unwrap().into_parts();
        let err = forwarder
            .forward(
                &upstream(&format!("http://{}", addr)),
                parts,
                Bytes::new(),
                ForwardMeta {
                    request_id: "req-3",
                    client_addr: None,
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ForwardError::Timeout(_)));
        assert_eq!(err.failure_kind(), Some(FailureKind::Timeout));
    }

    #[tokio::test]
    async fn test_stalled_body_times_out() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                // Promise 100 bytes, send 5.
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nhello")
                    .await;
                held.push(socket);
            }
        });

        let forwarder =
            Forwarder::new(&TimeoutConfig::default()).with_timeout(Duration::from_millis(200));
        let (parts, _) = Request::builder().uri("/reviews").body(()).unwrap().into_parts();
        let err = forwarder
            .forward(
                &upstream(&format!("http://{}", addr)),
                parts,
                Bytes::new(),
                ForwardMeta {
                    request_id: "req-4",
                    client_addr: None,
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ForwardError::Timeout(_)));
    }
}
