//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (path)
//!     → classifier.rs (ordered rule table)
//!     → ServiceName (or "unknown")
//!     → upstream registry resolves the base URL
//! ```
//!
//! # Design Decisions
//! - Rule table compiled at startup, immutable at runtime
//! - Deterministic: same path always yields the same service
//! - First match wins (table order)

pub mod classifier;

pub use classifier::{ClassifierRule, MatchKind, ServiceClassifier, ServiceName};
