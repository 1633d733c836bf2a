//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum serve loop on a background task)
//!     → request.rs (assign request ID, open request span)
//!     → handler (GET /health, or routes supplied by the embedder)
//!     → response.rs (fixed payloads, panic → 500)
//!     → Send to client
//! ```
//!
//! # Design Decisions
//! - A panicking handler never takes down the accept loop
//! - Shutdown stops accepting first, then drains within a deadline

pub mod request;
pub mod response;
pub mod server;

pub use request::{MakeRequestUuid, X_REQUEST_ID};
pub use server::{DrainOutcome, HttpServer, ServerError, ServerHandle};
