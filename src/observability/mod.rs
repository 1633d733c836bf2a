//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events (structured fields)
//!     → logging.rs (level filter, json/console formatting)
//!     → rotation.rs (size-capped file) and/or stdout
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing by default
//! - Request ID flows through every request span
//! - At least one sink always exists: stdout is forced on without a file

pub mod logging;
pub mod rotation;

pub use logging::{init, LogEncoding, LogHandle, LogInitError, LogLevel, LogOptions};
pub use rotation::{RollingFileAppender, RotationPolicy};
