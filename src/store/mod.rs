//! Relational store subsystem.
//!
//! # Data Flow
//! ```text
//! db section of AppConfig
//!     → StoreOptions (empty DSN = store disabled)
//!     → connector.rs (parse DSN, warn on limits sqlx cannot enforce)
//!     → probe (one dedicated connection, one ping, bounded by probe_timeout)
//!     → lazy pool with the positive limits applied
//!     → StoreHandle (shared pool, closed on shutdown)
//! ```
//!
//! # Design Decisions
//! - Open and probe failures are distinct errors; both abort bootstrap
//! - Pool limits are set once and never changed afterwards
//! - No reconnect loop: the probe runs exactly once

pub mod connector;

pub use connector::{connect, PoolLimits, StoreError, StoreHandle, StoreOptions};
