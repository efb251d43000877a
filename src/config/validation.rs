//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routing rules reference configured upstreams)
//! - Validate value ranges (windows, thresholds and timeouts > 0 and bounded)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::GatewayConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Upper bound for rate-limit windows and the sweep interval (one day).
const MAX_WINDOW_SECS: u64 = 86_400;
/// Upper bound for the breaker recovery timeout (one day).
const MAX_RECOVERY_SECS: u64 = 86_400;
/// Upper bound for upstream connect and response timeouts (one hour).
const MAX_TIMEOUT_SECS: u64 = 3_600;

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if let Some(tls) = &config.listener.tls {
        if tls.cert_path.trim().is_empty() {
            errors.push(ValidationError::new("listener.tls.cert_path", "must not be empty"));
        }
        if tls.key_path.trim().is_empty() {
            errors.push(ValidationError::new("listener.tls.key_path", "must not be empty"));
        }
    }

    let rl = &config.rate_limit;
    check_secs(&mut errors, "rate_limit.window_secs", rl.window_secs, MAX_WINDOW_SECS);
    if rl.max_requests == 0 {
        errors.push(ValidationError::new("rate_limit.max_requests", "must be greater than 0"));
    }
    check_secs(
        &mut errors,
        "rate_limit.sweep_interval_secs",
        rl.sweep_interval_secs,
        MAX_WINDOW_SECS,
    );

    let cb = &config.circuit_breaker;
    if cb.failure_threshold == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.failure_threshold",
            "must be greater than 0",
        ));
    }
    check_secs(
        &mut errors,
        "circuit_breaker.recovery_timeout_secs",
        cb.recovery_timeout_secs,
        MAX_RECOVERY_SECS,
    );
    if cb.half_open_max_probes == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.half_open_max_probes",
            "must be greater than 0",
        ));
    }

    check_secs(
        &mut errors,
        "timeouts.upstream_secs",
        config.timeouts.upstream_secs,
        MAX_TIMEOUT_SECS,
    );
    check_secs(
        &mut errors,
        "timeouts.connect_secs",
        config.timeouts.connect_secs,
        MAX_TIMEOUT_SECS,
    );

    let mut services = HashSet::new();
    for (i, upstream) in config.upstreams.iter().enumerate() {
        let field = format!("upstreams[{}]", i);
        if upstream.service.trim().is_empty() {
            errors.push(ValidationError::new(format!("{}.service", field), "must not be empty"));
        } else if !services.insert(upstream.service.as_str()) {
            errors.push(ValidationError::new(
                format!("{}.service", field),
                format!("duplicate upstream for service '{}'", upstream.service),
            ));
        }

        match Url::parse(&upstream.url) {
            Ok(url) if url.scheme() != "http" => errors.push(ValidationError::new(
                format!("{}.url", field),
                format!("unsupported scheme '{}', upstreams must use http", url.scheme()),
            )),
            Ok(url) if url.host_str().is_none() => {
                errors.push(ValidationError::new(format!("{}.url", field), "missing host"))
            }
            Ok(_) => {}
            Err(e) => errors.push(ValidationError::new(
                format!("{}.url", field),
                format!("invalid URL '{}': {}", upstream.url, e),
            )),
        }
    }

    for (i, rule) in config.routing.rules.iter().enumerate() {
        let field = format!("routing.rules[{}]", i);
        if rule.pattern.is_empty() {
            errors.push(ValidationError::new(format!("{}.pattern", field), "must not be empty"));
        }
        if !services.contains(rule.service.as_str()) {
            errors.push(ValidationError::new(
                format!("{}.service", field),
                format!("no upstream configured for service '{}'", rule.service),
            ));
        }
    }

    if config.identity.user_header.trim().is_empty() {
        errors.push(ValidationError::new("identity.user_header", "must not be empty"));
    } else if axum::http::HeaderName::from_bytes(config.identity.user_header.as_bytes()).is_err() {
        errors.push(ValidationError::new("identity.user_header", "not a valid header name"));
    }

    if config.security.max_body_size == 0 {
        errors.push(ValidationError::new("security.max_body_size", "must be greater than 0"));
    }

    if config.observability.metrics_enabled {
        check_addr(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if config.admin.enabled {
        check_addr(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.trim().is_empty() {
            errors.push(ValidationError::new(
                "admin.api_key",
                "must be set when the admin API is enabled",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_secs(errors: &mut Vec<ValidationError>, field: &str, value: u64, max: u64) {
    if value == 0 {
        errors.push(ValidationError::new(field, "must be greater than 0"));
    } else if value > max {
        errors.push(ValidationError::new(
            field,
            format!("must be at most {} seconds", max),
        ));
    }
}

fn check_addr(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            field,
            format!("'{}' is not a valid socket address", value),
        ));
    }
}
