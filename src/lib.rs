//! ezchat-server library.
//!
//! Process lifecycle for the chat server: configuration, logging and store
//! bootstrap, followed by a supervised HTTP serve loop with bounded graceful
//! shutdown.

pub mod cli;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod store;

pub use config::{AppConfig, ConfigProvider};
pub use http::HttpServer;
pub use lifecycle::{LifecycleError, Orchestrator, Phase};
