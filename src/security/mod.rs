//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → identity.rs (resolve caller from trusted header)
//!     → rate_limit.rs (sliding window per user or address)
//!     → Pass to circuit breaker admission
//!
//! Forwarded request / response:
//!     → headers.rs (strip hop-by-hop, add X-Forwarded-For)
//! ```
//!
//! # Design Decisions
//! - Identity is trusted as given; token validation lives in front of the gateway
//! - Rejected requests are never recorded in the window
//! - No global lock: each key owns its own window

pub mod headers;
pub mod identity;
pub mod rate_limit;

pub use identity::{CallerIdentity, RateLimitKey};
pub use rate_limit::{RateLimitDecision, SlidingWindowLimiter};
