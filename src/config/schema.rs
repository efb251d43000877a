//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::routing::classifier::{default_rules, ClassifierRule};

/// Root configuration for the API gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Sliding-window rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Per-service circuit breaking.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Upstream service base URLs.
    pub upstreams: Vec<UpstreamConfig>,

    /// Path → service classification table.
    pub routing: RoutingConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Caller identity extraction.
    pub identity: IdentityConfig,

    pub security: SecurityConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8000").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
            tls: None,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Length of the trailing window in seconds.
    pub window_secs: u64,

    /// Maximum admitted requests per key within the window.
    pub max_requests: usize,

    /// How often idle keys are swept from memory, in seconds.
    pub sweep_interval_secs: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: 60,
            max_requests: 100,
            sweep_interval_secs: 60,
        }
    }
}

/// What a client disconnect during an upstream call means to the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CancellationPolicy {
    /// Neither a success nor a failure.
    #[default]
    Ignore,
    /// Recorded as a breaker failure.
    Failure,
}

impl std::str::FromStr for CancellationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ignore" => Ok(Self::Ignore),
            "failure" => Ok(Self::Failure),
            other => Err(format!("unknown cancellation policy '{}'", other)),
        }
    }
}

/// Circuit breaker configuration, shared by every per-service breaker.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker.
    pub failure_threshold: u32,

    /// Seconds after the last failure before a trial request is allowed.
    pub recovery_timeout_secs: u64,

    /// Concurrent trial requests admitted while half-open.
    pub half_open_max_probes: u32,

    /// Reset the failure count on any success while closed.
    pub reset_on_success: bool,

    /// Count upstream 5xx responses as breaker failures.
    pub upstream_5xx_is_failure: bool,

    /// Client disconnect handling during an upstream call.
    pub cancellation: CancellationPolicy,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 60,
            half_open_max_probes: 1,
            reset_on_success: false,
            upstream_5xx_is_failure: false,
            cancellation: CancellationPolicy::Ignore,
        }
    }
}

/// Upstream service definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Service label, as produced by the routing table.
    pub service: String,

    /// Base URL (e.g., "http://restaurant-service:8002").
    pub url: String,
}

impl UpstreamConfig {
    pub fn new(service: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            url: url.into(),
        }
    }
}

/// Default upstreams for the SmartDine backend services.
pub fn default_upstreams() -> Vec<UpstreamConfig> {
    vec![
        UpstreamConfig::new("auth-service", "http://auth-service:8001"),
        UpstreamConfig::new("restaurant-service", "http://restaurant-service:8002"),
        UpstreamConfig::new("preference-service", "http://preference-service:8003"),
        UpstreamConfig::new("review-service", "http://review-service:8004"),
    ]
}

/// Path classification table.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Ordered rules; first match wins.
    pub rules: Vec<ClassifierRule>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
        }
    }
}

/// Timeout configuration for upstream calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Time allowed for the upstream response head, in seconds.
    pub upstream_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            upstream_secs: 30,
        }
    }
}

/// Identity extraction. Authentication itself happens in front of the gateway
/// core; this only names where the authenticated caller is found.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Header carrying the authenticated user id.
    pub user_header: String,

    /// Accept `user_header` from clients. Only enable when an authenticating
    /// proxy in front of the gateway sets or overwrites it; otherwise callers
    /// are keyed by address and the header is removed before forwarding.
    pub trust_user_header: bool,

    /// Use the first `X-Forwarded-For` hop as the client address.
    pub trust_forwarded_for: bool,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user_header: "x-user-id".to_string(),
            trust_user_header: false,
            trust_forwarded_for: false,
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            upstreams: default_upstreams(),
            routing: RoutingConfig::default(),
            timeouts: TimeoutConfig::default(),
            identity: IdentityConfig::default(),
            security: SecurityConfig::default(),
            observability: ObservabilityConfig::default(),
            admin: AdminConfig::default(),
        }
    }
}
