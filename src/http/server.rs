//! HTTP server setup and pipeline composition.
//!
//! # Responsibilities
//! - Create the Axum Router with the gateway pipeline
//! - Wire up middleware (request ID, tracing, context, identity, rate limit, breaker)
//! - Bind the server to a listener, plain or TLS
//! - Forward admitted requests to the upstream service
//!
//! # Pipeline (outermost first)
//! ```text
//! request id → trace → context → identity → rate limit → circuit breaker → forward
//! ```
//! `/health` is mounted after the pipeline layers and skips all of them.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::http::request::{context_middleware, MakeRequestUuid, RequestContext, X_REQUEST_ID};
use crate::http::response::health;
use crate::lifecycle::shutdown::recv_shutdown;
use crate::observability::metrics;
use crate::resilience::admission::circuit_breaker_middleware;
use crate::resilience::CircuitBreakerRegistry;
use crate::routing::ServiceClassifier;
use crate::security::identity::identity_middleware;
use crate::security::rate_limit::{rate_limit_middleware, spawn_sweeper, SlidingWindowLimiter};
use crate::upstream::{FailureKind, ForwardMeta, ForwardOutcome, Forwarder, UpstreamRegistry};

/// Application state injected into handlers and middleware.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub classifier: Arc<ServiceClassifier>,
    pub limiter: Arc<SlidingWindowLimiter>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub upstreams: Arc<UpstreamRegistry>,
    pub forwarder: Forwarder,
}

impl AppState {
    /// Build every shared subsystem from configuration.
    pub fn new(config: GatewayConfig) -> Self {
        let classifier = Arc::new(ServiceClassifier::new(config.routing.rules.clone()));
        let limiter = Arc::new(SlidingWindowLimiter::new(
            config.rate_limit.max_requests,
            config.rate_limit.window(),
        ));
        let breakers = Arc::new(CircuitBreakerRegistry::from_config(&config.circuit_breaker));
        let upstreams = Arc::new(UpstreamRegistry::new(&config.upstreams));
        let forwarder = Forwarder::new(&config.timeouts);

        Self {
            config: Arc::new(config),
            classifier,
            limiter,
            breakers,
            upstreams,
            forwarder,
        }
    }
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_state(AppState::new(config))
    }

    pub fn with_state(state: AppState) -> Self {
        let router = Self::build_router(state.clone());
        Self { router, state }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(forward_handler))
            .route("/", any(forward_handler))
            .layer(from_fn_with_state(state.clone(), circuit_breaker_middleware))
            .layer(from_fn_with_state(state.clone(), rate_limit_middleware))
            .layer(from_fn_with_state(state.clone(), identity_middleware))
            .layer(from_fn_with_state(state.clone(), context_middleware))
            .route("/health", get(health))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID.clone()))
            .layer(SetRequestIdLayer::new(X_REQUEST_ID.clone(), MakeRequestUuid))
            .with_state(state)
    }

    /// The shared state (breaker registry, limiter, config).
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// A clone of the router, for in-process use.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener until shutdown.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        self.spawn_background(&shutdown);

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(recv_shutdown(shutdown))
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Run the server with TLS termination until shutdown.
    pub async fn run_tls(
        self,
        addr: SocketAddr,
        tls: RustlsConfig,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), io::Error> {
        tracing::info!(address = %addr, "HTTPS server starting");

        self.spawn_background(&shutdown);

        let handle = axum_server::Handle::new();
        let drain = handle.clone();
        tokio::spawn(async move {
            recv_shutdown(shutdown).await;
            drain.graceful_shutdown(Some(Duration::from_secs(30)));
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(app)
            .await?;

        tracing::info!("HTTPS server stopped");
        Ok(())
    }

    fn spawn_background(&self, shutdown: &broadcast::Receiver<()>) {
        let rate_limit = &self.state.config.rate_limit;
        if rate_limit.enabled {
            spawn_sweeper(
                self.state.limiter.clone(),
                Duration::from_secs(rate_limit.sweep_interval_secs),
                shutdown.resubscribe(),
            );
        }
    }
}

/// Final stage: forward the request to the upstream that owns its service.
async fn forward_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let Some(ctx) = request.extensions().get::<RequestContext>().cloned() else {
        return not_attempted(GatewayError::Internal("request context missing".into()));
    };

    let Some(upstream) = state.upstreams.resolve(&ctx.service) else {
        tracing::warn!(request_id = %ctx.request_id, path = %ctx.path, service = %ctx.service, "No upstream for service");
        return not_attempted(GatewayError::NoUpstream {
            service: ctx.service,
        });
    };

    let limit = state.config.security.max_body_size;
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        // Over the limit, or the client stopped sending.
        Err(e) => {
            tracing::debug!(request_id = %ctx.request_id, error = %e, "Request body rejected");
            return not_attempted(GatewayError::PayloadTooLarge { limit });
        }
    };

    let meta = ForwardMeta {
        request_id: &ctx.request_id,
        client_addr: ctx.client_addr,
    };

    match state.forwarder.forward(&upstream, parts, body, meta).await {
        Ok(mut response) => {
            let status = response.status();
            let outcome =
                if status.is_server_error() && state.config.circuit_breaker.upstream_5xx_is_failure {
                    tracing::warn!(request_id = %ctx.request_id, service = %ctx.service, status = %status, "Upstream server error");
                    metrics::record_upstream_failure(ctx.service.as_str(), FailureKind::Upstream5xx);
                    ForwardOutcome::Failure(FailureKind::Upstream5xx)
                } else {
                    ForwardOutcome::Success
                };
            response.extensions_mut().insert(outcome);
            response
        }
        Err(err) => match err.failure_kind() {
            Some(kind) => {
                tracing::warn!(request_id = %ctx.request_id, service = %ctx.service, error = %err, "Upstream request failed");
                metrics::record_upstream_failure(ctx.service.as_str(), kind);
                let mut response = GatewayError::UpstreamUnavailable {
                    service: ctx.service,
                    kind,
                }
                .into_response();
                response.extensions_mut().insert(ForwardOutcome::Failure(kind));
                response
            }
            None => not_attempted(GatewayError::Internal(err.to_string())),
        },
    }
}

fn not_attempted(error: GatewayError) -> Response {
    let mut response = error.into_response();
    response.extensions_mut().insert(ForwardOutcome::NotAttempted);
    response
}
