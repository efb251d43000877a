//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use thiserror::Error;

use crate::config::schema::{GatewayConfig, UpstreamConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {var}: '{value}'")]
    Env { var: &'static str, value: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Environment variables naming a service base URL.
const SERVICE_URL_VARS: &[(&str, &str)] = &[
    ("AUTH_SERVICE_URL", "auth-service"),
    ("RESTAURANT_SERVICE_URL", "restaurant-service"),
    ("PREFERENCE_SERVICE_URL", "preference-service"),
    ("REVIEW_SERVICE_URL", "review-service"),
];

/// Load configuration: TOML file (if any), then process environment, then validation.
pub fn load_config(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    load_config_with(path, |var| std::env::var(var).ok())
}

/// [`load_config`] with `lookup` as the variable source.
pub fn load_config_with<F>(path: Option<&Path>, lookup: F) -> Result<GatewayConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => GatewayConfig::default(),
    };

    apply_env_overrides(&mut config, lookup)?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply environment overrides using `lookup` as the variable source.
pub fn apply_env_overrides<F>(config: &mut GatewayConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let host = lookup("API_GATEWAY_HOST");
    let port = lookup("API_GATEWAY_PORT");
    if host.is_some() || port.is_some() {
        let (current_host, current_port) = split_host_port(&config.listener.bind_address);
        let port = match port {
            Some(p) => parse_var::<u16>("API_GATEWAY_PORT", p)?.to_string(),
            None => current_port,
        };
        let host = host.unwrap_or(current_host);
        config.listener.bind_address = format!("{}:{}", host, port);
    }

    if let Some(v) = lookup("RATE_LIMIT_WINDOW") {
        config.rate_limit.window_secs = parse_var("RATE_LIMIT_WINDOW", v)?;
    }
    if let Some(v) = lookup("RATE_LIMIT_MAX_REQUESTS") {
        config.rate_limit.max_requests = parse_var("RATE_LIMIT_MAX_REQUESTS", v)?;
    }

    if let Some(v) = lookup("CIRCUIT_BREAKER_FAILURE_THRESHOLD") {
        config.circuit_breaker.failure_threshold =
            parse_var("CIRCUIT_BREAKER_FAILURE_THRESHOLD", v)?;
    }
    if let Some(v) = lookup("CIRCUIT_BREAKER_RECOVERY_TIMEOUT") {
        config.circuit_breaker.recovery_timeout_secs =
            parse_var("CIRCUIT_BREAKER_RECOVERY_TIMEOUT", v)?;
    }
    if let Some(v) = lookup("CIRCUIT_BREAKER_HALF_OPEN_MAX_PROBES") {
        config.circuit_breaker.half_open_max_probes =
            parse_var("CIRCUIT_BREAKER_HALF_OPEN_MAX_PROBES", v)?;
    }
    if let Some(v) = lookup("CIRCUIT_BREAKER_RESET_ON_SUCCESS") {
        config.circuit_breaker.reset_on_success =
            parse_var("CIRCUIT_BREAKER_RESET_ON_SUCCESS", v)?;
    }
    if let Some(v) = lookup("CIRCUIT_BREAKER_FAILURE_ON_5XX") {
        config.circuit_breaker.upstream_5xx_is_failure =
            parse_var("CIRCUIT_BREAKER_FAILURE_ON_5XX", v)?;
    }
    if let Some(v) = lookup("CIRCUIT_BREAKER_CANCELLATION") {
        config.circuit_breaker.cancellation = parse_var("CIRCUIT_BREAKER_CANCELLATION", v)?;
    }

    if let Some(v) = lookup("TRUST_USER_HEADER") {
        config.identity.trust_user_header = parse_var("TRUST_USER_HEADER", v)?;
    }

    if let Some(v) = lookup("UPSTREAM_TIMEOUT") {
        config.timeouts.upstream_secs = parse_var("UPSTREAM_TIMEOUT", v)?;
    }

    for (var, service) in SERVICE_URL_VARS {
        if let Some(url) = lookup(var) {
            match config.upstreams.iter_mut().find(|u| u.service == *service) {
                Some(upstream) => upstream.url = url,
                None => config.upstreams.push(UpstreamConfig::new(*service, url)),
            }
        }
    }

    if let Some(v) = lookup("LOG_LEVEL") {
        config.observability.log_level = v.to_ascii_lowercase();
    }
    if let Some(v) = lookup("METRICS_ADDRESS") {
        config.observability.metrics_address = v;
        config.observability.metrics_enabled = true;
    }
    if let Some(v) = lookup("ADMIN_API_KEY") {
        config.admin.api_key = v;
        config.admin.enabled = true;
    }

    Ok(())
}

fn parse_var<T: FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { var, value })
}

fn split_host_port(addr: &str) -> (String, String) {
    match addr.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), port.to_string()),
        None => (addr.to_string(), "8000".to_string()),
    }
}
