//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML/YAML/JSON), optional
//!     → loader.rs (locate, parse & deserialize)
//!     → EZCHAT_* environment overrides
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no reload path
//! - All fields have defaults to allow minimal configs
//! - An explicit `--config` path must exist; the default search may come up empty
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{ConfigError, ConfigProvider, LoadedConfig, ENV_PREFIX};
pub use schema::{AppConfig, DbConfig, HttpConfig, LogConfig};
pub use validation::ValidationError;
