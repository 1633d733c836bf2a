//! Orchestrator phase state machine.
//!
//! # States
//! ```text
//! Created → ConfigLoaded → LoggerReady → StoreReady → Serving → ShuttingDown → Stopped
//!                               │                        ▲
//!                               └────────────────────────┘  (store skipped: empty DSN)
//! ```
//!
//! # Design Decisions
//! - Transitions only move forward; there is no rollback edge
//! - A failed bootstrap simply leaves the phase where it stopped

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Created,
    ConfigLoaded,
    LoggerReady,
    StoreReady,
    Serving,
    ShuttingDown,
    Stopped,
}

impl Phase {
    /// Whether `next` is a legal successor of `self`.
    ///
    /// `LoggerReady → Serving` is structurally legal; the orchestrator only
    /// takes it when the store was skipped.
    pub fn can_advance_to(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Created, ConfigLoaded)
                | (ConfigLoaded, LoggerReady)
                | (LoggerReady, StoreReady)
                | (LoggerReady, Serving)
                | (StoreReady, Serving)
                | (Serving, ShuttingDown)
                | (ShuttingDown, Stopped)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Created => "created",
            Phase::ConfigLoaded => "config-loaded",
            Phase::LoggerReady => "logger-ready",
            Phase::StoreReady => "store-ready",
            Phase::Serving => "serving",
            Phase::ShuttingDown => "shutting-down",
            Phase::Stopped => "stopped",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
