//! Configuration loading from disk and environment.
//!
//! Precedence, lowest first: hard defaults, config file, `EZCHAT_*` variables.

use std::collections::HashMap;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::schema::AppConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Prefix of environment variables that override file values.
pub const ENV_PREFIX: &str = "EZCHAT";

/// Base name looked up in the default search directories.
const CONFIG_NAME: &str = "config";

/// Extensions tried, in order, for each search directory.
const CONFIG_EXTENSIONS: [&str; 4] = ["toml", "yaml", "yml", "json"];

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("config file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed file content or an unconvertible environment value.
    #[error("failed to parse config from {origin}: {message}")]
    Parse { origin: String, message: String },

    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Supported on-disk formats, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Unknown or missing extensions fall back to TOML.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("yaml") | Some("yml") => ConfigFormat::Yaml,
            Some("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }

    fn parse(self, content: &str, origin: &Path) -> Result<AppConfig, ConfigError> {
        if content.trim().is_empty() {
            return Ok(AppConfig::default());
        }
        let result = match self {
            ConfigFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
            ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
            ConfigFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
        };
        result.map_err(|message| ConfigError::Parse {
            origin: origin.display().to_string(),
            message,
        })
    }
}

/// A validated snapshot plus the file it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: AppConfig,
    /// `None` when no file was found and defaults were used.
    pub source: Option<PathBuf>,
}

/// Loads configuration snapshots.
///
/// The environment is captured when the provider is built, so two providers
/// in one process never observe each other's overrides.
#[derive(Debug, Clone)]
pub struct ConfigProvider {
    explicit_path: Option<PathBuf>,
    search_dirs: Vec<PathBuf>,
    env: HashMap<String, String>,
}

impl ConfigProvider {
    /// Provider reading `path` (if given) and the process environment.
    pub fn new(path: Option<PathBuf>) -> Self {
        let prefix = format!("{ENV_PREFIX}_");
        let env = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .filter(|(k, _)| k.starts_with(&prefix))
            .collect();

        Self {
            explicit_path: path,
            search_dirs: vec![PathBuf::from("./config"), PathBuf::from(".")],
            env,
        }
    }

    /// Replace the directories searched when no explicit path is given.
    pub fn with_search_dirs<I, P>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.search_dirs = dirs.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the captured environment.
    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// Load, merge and validate a snapshot.
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let source = match &self.explicit_path {
            Some(path) => {
                if !path.is_file() {
                    return Err(ConfigError::NotFound { path: path.clone() });
                }
                Some(path.clone())
            }
            None => self.locate(),
        };

        let mut config = match &source {
            Some(path) => read_file(path)?,
            None => AppConfig::default(),
        };

        apply_env_overrides(&mut config, &self.env)?;
        validate_config(&config).map_err(ConfigError::Validation)?;

        Ok(LoadedConfig { config, source })
    }

    /// First `config.<ext>` found in the search directories.
    fn locate(&self) -> Option<PathBuf> {
        self.search_dirs.iter().find_map(|dir| {
            CONFIG_EXTENSIONS
                .iter()
                .map(|ext| dir.join(format!("{CONFIG_NAME}.{ext}")))
                .find(|candidate| candidate.is_file())
        })
    }
}

fn read_file(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    ConfigFormat::from_path(path).parse(&content, path)
}

/// Field types that can be overridden from a string variable.
trait EnvValue: Sized {
    fn from_env(raw: &str) -> Result<Self, String>;
}

impl EnvValue for String {
    fn from_env(raw: &str) -> Result<Self, String> {
        Ok(raw.to_string())
    }
}

impl EnvValue for bool {
    fn from_env(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "t" | "true" | "yes" | "on" => Ok(true),
            "0" | "f" | "false" | "no" | "off" => Ok(false),
            other => Err(format!("invalid boolean {other:?}")),
        }
    }
}

fn parse_number<T>(raw: &str) -> Result<T, String>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim().parse::<T>().map_err(|e| e.to_string())
}

impl EnvValue for u16 {
    fn from_env(raw: &str) -> Result<Self, String> {
        parse_number(raw)
    }
}

impl EnvValue for i64 {
    fn from_env(raw: &str) -> Result<Self, String> {
        parse_number(raw)
    }
}

fn override_field<T: EnvValue>(
    slot: &mut T,
    key: &str,
    env: &HashMap<String, String>,
) -> Result<(), ConfigError> {
    let name = format!("{ENV_PREFIX}_{key}");
    if let Some(raw) = env.get(&name) {
        *slot = T::from_env(raw).map_err(|message| ConfigError::Parse {
            origin: format!("environment variable {name}"),
            message,
        })?;
    }
    Ok(())
}

fn apply_env_overrides(
    config: &mut AppConfig,
    env: &HashMap<String, String>,
) -> Result<(), ConfigError> {
    override_field(&mut config.http.host, "HTTP_HOST", env)?;
    override_field(&mut config.http.port, "HTTP_PORT", env)?;

    override_field(&mut config.log.level, "LOG_LEVEL", env)?;
    override_field(&mut config.log.encoding, "LOG_ENCODING", env)?;
    override_field(&mut config.log.file, "LOG_FILE", env)?;
    override_field(&mut config.log.max_size_mb, "LOG_MAX_SIZE_MB", env)?;
    override_field(&mut config.log.max_backups, "LOG_MAX_BACKUPS", env)?;
    override_field(&mut config.log.max_age_days, "LOG_MAX_AGE_DAYS", env)?;
    override_field(&mut config.log.compress, "LOG_COMPRESS", env)?;
    override_field(&mut config.log.console, "LOG_CONSOLE", env)?;

    override_field(&mut config.db.dsn, "DB_DSN", env)?;
    override_field(&mut config.db.max_open_conns, "DB_MAX_OPEN_CONNS", env)?;
    override_field(&mut config.db.max_idle_conns, "DB_MAX_IDLE_CONNS", env)?;
    override_field(&mut config.db.conn_max_idle_sec, "DB_CONN_MAX_IDLE_SEC", env)?;
    override_field(&mut config.db.conn_max_life_sec, "DB_CONN_MAX_LIFE_SEC", env)?;
    override_field(&mut config.db.probe_timeout_sec, "DB_PROBE_TIMEOUT_SEC", env)?;

    Ok(())
}
