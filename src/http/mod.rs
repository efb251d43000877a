//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, pipeline layers)
//!     → request.rs (request ID, RequestContext, service classification)
//!     → security / resilience stages
//!     → server.rs forward handler (upstream call)
//!     → response.rs (health, error bodies)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestContext, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
