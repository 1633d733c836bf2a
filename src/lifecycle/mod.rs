//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Bootstrap (orchestrator.rs):
//!     Load config → Build logger → Connect store (skipped on empty DSN)
//!
//! Serve (orchestrator.rs):
//!     Bind listener → Serving → wait for termination
//!
//! Shutdown (orchestrator.rs):
//!     Signal received → Stop accepting → Drain until deadline → Stopped
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → single pending termination request
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then logging, then store, listeners last
//! - Ordered shutdown: stop accept, drain, close store, flush logs
//! - Shutdown has timeout: forced stop after deadline

pub mod orchestrator;
pub mod phase;
pub mod signals;

use std::time::Duration;

use crate::config::ConfigError;
use crate::http::ServerError;
use crate::observability::LogInitError;
use crate::store::StoreError;

pub use orchestrator::{Orchestrator, DEFAULT_SHUTDOWN_TIMEOUT};
pub use phase::Phase;
pub use signals::{ShutdownTrigger, Termination, TerminationSignal};

/// Every failure the orchestrator can return.
///
/// Collaborator errors are carried unchanged.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Log(#[from] LogInitError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Server(#[from] ServerError),

    /// In-flight requests were still running when the drain deadline passed.
    #[error("graceful shutdown did not complete within {timeout:?}")]
    ShutdownTimeout { timeout: Duration },

    #[error("cannot {operation} while {phase}")]
    InvalidPhase {
        operation: &'static str,
        phase: Phase,
    },

    #[error("invalid phase transition {from} -> {to}")]
    InvalidTransition { from: Phase, to: Phase },
}
