//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → loader.rs (environment overrides)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Environment wins over the file so container deployments need no file
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_config_with, ConfigError};
pub use schema::{
    AdminConfig, CancellationPolicy, CircuitBreakerConfig, GatewayConfig, IdentityConfig,
    ListenerConfig, ObservabilityConfig, RateLimitConfig, RoutingConfig, SecurityConfig,
    TimeoutConfig, TlsConfig, UpstreamConfig,
};
