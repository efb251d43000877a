//! Upstream subsystem.
//!
//! # Data Flow
//! ```text
//! ServiceName (from the classifier)
//!     → registry.rs (base URL for the service)
//!     → forwarder.rs (rewrite, send with timeout)
//!     → ForwardOutcome attached to the response for the breaker stage
//! ```

pub mod forwarder;
pub mod registry;

pub use forwarder::{ForwardError, ForwardMeta, Forwarder};
pub use registry::{Upstream, UpstreamRegistry};

/// Kind of breaker-relevant failure, used as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    Transport,
    Upstream5xx,
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Transport => "transport",
            FailureKind::Upstream5xx => "upstream_5xx",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

/// Result of the forward stage, carried back to the breaker stage as a
/// response extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    Success,
    Failure(FailureKind),
    /// The request never reached an upstream (no route, body too large, internal error).
    NotAttempted,
}
