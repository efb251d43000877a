//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//!
//! Shutdown (shutdown.rs):
//!     Broadcast → stop accepting → drain in-flight requests → exit
//! ```
//!
//! # Design Decisions
//! - Startup order: config, logging, metrics, then listeners
//! - Background tasks subscribe to the same broadcast

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
