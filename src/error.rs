//! Gateway error taxonomy.
//!
//! Every terminal error response the gateway produces is built from a
//! [`GatewayError`]. Bodies carry a human message, a machine reason and the
//! service when one is involved; internal error text is logged, never returned.

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::http::response::error_response;
use crate::resilience::CircuitState;
use crate::routing::ServiceName;
use crate::upstream::FailureKind;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("rate limit of {limit} requests exceeded")]
    RateLimited { limit: usize, retry_after: Duration },

    #[error("circuit for {service} is {state}")]
    CircuitOpen {
        service: ServiceName,
        state: CircuitState,
    },

    #[error("upstream {service} unavailable ({})", .kind.as_str())]
    UpstreamUnavailable {
        service: ServiceName,
        kind: FailureKind,
    },

    #[error("no upstream configured for {service}")]
    NoUpstream { service: ServiceName },

    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::CircuitOpen { .. } | GatewayError::UpstreamUnavailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GatewayError::NoUpstream { .. } => StatusCode::NOT_FOUND,
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable reason code.
    pub fn reason(&self) -> &'static str {
        match self {
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::CircuitOpen {
                state: CircuitState::HalfOpen,
                ..
            } => "half_open_probe_in_flight",
            GatewayError::CircuitOpen { .. } => "circuit_open",
            GatewayError::UpstreamUnavailable {
                kind: FailureKind::Timeout,
                ..
            } => "upstream_timeout",
            GatewayError::UpstreamUnavailable { .. } => "upstream_unreachable",
            GatewayError::NoUpstream { .. } => "no_route",
            GatewayError::PayloadTooLarge { .. } => "payload_too_large",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    fn detail(&self) -> String {
        match self {
            GatewayError::RateLimited { .. } => {
                "Too many requests. Please try again later.".to_string()
            }
            GatewayError::CircuitOpen { service, .. } => {
                format!("Service {} is temporarily unavailable", service)
            }
            GatewayError::UpstreamUnavailable { service, .. } => {
                format!("Service {} is experiencing issues", service)
            }
            GatewayError::NoUpstream { service } => {
                format!("No upstream is configured for service {}", service)
            }
            GatewayError::PayloadTooLarge { limit } => {
                format!("Request body exceeds the limit of {} bytes", limit)
            }
            GatewayError::Internal(_) => "Internal gateway error".to_string(),
        }
    }

    fn service(&self) -> Option<&ServiceName> {
        match self {
            GatewayError::CircuitOpen { service, .. }
            | GatewayError::UpstreamUnavailable { service, .. }
            | GatewayError::NoUpstream { service } => Some(service),
            _ => None,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        if let GatewayError::Internal(message) = &self {
            tracing::error!(error = %message, "Internal gateway error");
        }

        let mut response = error_response(
            self.status(),
            &self.detail(),
            self.reason(),
            self.service().map(ServiceName::as_str),
        );

        if let GatewayError::RateLimited { limit, retry_after } = &self {
            let headers = response.headers_mut();
            headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs(*retry_after)));
            headers.insert("x-ratelimit-limit", HeaderValue::from(*limit));
            headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        }

        response
    }
}

/// Whole seconds, rounded up, never below one.
fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs().saturating_add(u64::from(wait.subsec_nanos() > 0));
    secs.max(1)
}
