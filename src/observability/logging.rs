//! Structured logging.
//!
//! # Responsibilities
//! - Build the log handle from the `log` section of the configuration
//! - Multiplex events to a rotating file sink and/or stdout
//! - Map configured level names onto tracing filters
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format unless `console` is requested explicitly
//! - Handles are explicit values, not process globals; the binary installs
//!   its handle as the global default, tests scope theirs with `with_default`

use std::convert::Infallible;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::dispatcher::SetGlobalDefaultError;
use tracing::Dispatch;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{Layer, Registry};

use crate::config::LogConfig;
use crate::observability::rotation::{RollingFileAppender, RotationPolicy, DEFAULT_MAX_BYTES};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Configured severity.
///
/// `DPanic`, `Panic` and `Fatal` are accepted for compatibility with existing
/// configuration files; all three filter at `ERROR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    DPanic,
    Panic,
    Fatal,
}

impl LogLevel {
    /// Case-insensitive, total mapping. Unknown names become `Info`.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            "dpanic" => LogLevel::DPanic,
            "panic" => LogLevel::Panic,
            "fatal" => LogLevel::Fatal,
            _ => LogLevel::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::DPanic => "dpanic",
            LogLevel::Panic => "panic",
            LogLevel::Fatal => "fatal",
        }
    }

    pub fn level_filter(&self) -> LevelFilter {
        match self {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error | LogLevel::DPanic | LogLevel::Panic | LogLevel::Fatal => {
                LevelFilter::ERROR
            }
        }
    }
}

impl FromStr for LogLevel {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(LogLevel::parse(s))
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format for every sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEncoding {
    /// One JSON object per line.
    Json,
    /// Human-readable text.
    Console,
}

impl LogEncoding {
    /// Only `console` selects text; everything else is JSON.
    pub fn parse(name: &str) -> Self {
        if name.trim().eq_ignore_ascii_case("console") {
            LogEncoding::Console
        } else {
            LogEncoding::Json
        }
    }
}

impl fmt::Display for LogEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogEncoding::Json => "json",
            LogEncoding::Console => "console",
        })
    }
}

/// Logger settings, decoupled from the configuration schema.
#[derive(Debug, Clone, PartialEq)]
pub struct LogOptions {
    pub level: LogLevel,
    pub encoding: LogEncoding,
    pub file: Option<PathBuf>,
    pub max_size_mb: i64,
    pub max_backups: i64,
    pub max_age_days: i64,
    pub compress: bool,
    pub console: bool,
}

impl From<&LogConfig> for LogOptions {
    fn from(config: &LogConfig) -> Self {
        let file = config.file.trim();
        Self {
            level: LogLevel::parse(&config.level),
            encoding: LogEncoding::parse(&config.encoding),
            file: (!file.is_empty()).then(|| PathBuf::from(file)),
            max_size_mb: config.max_size_mb,
            max_backups: config.max_backups,
            max_age_days: config.max_age_days,
            compress: config.compress,
            console: config.console,
        }
    }
}

impl LogOptions {
    /// Console output is forced on when there is no file sink.
    pub fn console_enabled(&self) -> bool {
        self.console || self.file.is_none()
    }

    /// Rotation limits; non-positive values mean "no limit" or the default size.
    pub fn rotation_policy(&self) -> RotationPolicy {
        let max_bytes = u64::try_from(self.max_size_mb)
            .ok()
            .filter(|mb| *mb > 0)
            .map(|mb| mb.saturating_mul(1024 * 1024))
            .unwrap_or(DEFAULT_MAX_BYTES);

        RotationPolicy {
            max_bytes,
            max_backups: usize::try_from(self.max_backups).ok().filter(|n| *n > 0),
            max_age: u64::try_from(self.max_age_days)
                .ok()
                .filter(|days| *days > 0)
                .map(|days| Duration::from_secs(days.saturating_mul(24 * 60 * 60))),
            compress: self.compress,
        }
    }
}

/// Error type for logger construction.
#[derive(Debug, thiserror::Error)]
pub enum LogInitError {
    #[error("failed to open log file {}: {source}", path.display())]
    OpenFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A constructed logger. Cloning shares the same sinks.
#[derive(Debug, Clone)]
pub struct LogHandle {
    dispatch: Dispatch,
    file: Option<RollingFileAppender>,
    level: LogLevel,
    encoding: LogEncoding,
    console: bool,
}

impl LogHandle {
    /// The subscriber all events should be routed to.
    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn encoding(&self) -> LogEncoding {
        self.encoding
    }

    /// Whether the stdout sink is active.
    pub fn has_console(&self) -> bool {
        self.console
    }

    /// Path of the active log file, if the file sink is active.
    pub fn file_path(&self) -> Option<PathBuf> {
        self.file.as_ref().map(RollingFileAppender::path)
    }

    /// Make this handle the process-wide default. Fails if one is already set.
    pub fn install_global(&self) -> Result<(), SetGlobalDefaultError> {
        tracing::dispatcher::set_global_default(self.dispatch.clone())
    }

    /// Flush the file sink.
    pub fn flush(&self) -> io::Result<()> {
        match &self.file {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// Build a log handle.
///
/// Opening the file sink is the only failure; there is no silent fallback to
/// console-only output.
pub fn init(options: &LogOptions) -> Result<LogHandle, LogInitError> {
    let mut layers: Vec<BoxedLayer> = Vec::new();

    let file = match &options.file {
        Some(path) => {
            let appender = RollingFileAppender::open(path, options.rotation_policy())
                .map_err(|source| LogInitError::OpenFile {
                    path: path.clone(),
                    source,
                })?;
            layers.push(fmt_layer(appender.clone(), options.encoding, false));
            Some(appender)
        }
        None => None,
    };

    let console = options.console_enabled();
    if console {
        layers.push(fmt_layer(io::stdout, options.encoding, true));
    }

    let subscriber = Registry::default()
        .with(layers)
        .with(options.level.level_filter());

    Ok(LogHandle {
        dispatch: Dispatch::new(subscriber),
        file,
        level: options.level,
        encoding: options.encoding,
        console,
    })
}

fn fmt_layer<W>(writer: W, encoding: LogEncoding, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    match encoding {
        LogEncoding::Json => layer.json().boxed(),
        LogEncoding::Console => layer.with_ansi(ansi).boxed(),
    }
}
