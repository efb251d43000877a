//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to upstream:
//!     → admission.rs (breaker open? reject with 503, no upstream call)
//!     → registry.rs (one breaker per service, created on first use)
//!     → circuit_breaker.rs (state machine, lazy Open → Half-Open)
//!     → After the forward: admission.rs records success / failure
//! ```
//!
//! # Design Decisions
//! - Registry is an owned object handed to the pipeline, not a process-wide static
//! - No automatic retries; a failing upstream is not amplified
//! - Distinct services never contend on the same lock

pub mod admission;
pub mod circuit_breaker;
pub mod registry;

pub use admission::CallPermit;
pub use circuit_breaker::{BreakerSettings, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use registry::CircuitBreakerRegistry;
