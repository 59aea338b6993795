//! Tracing subscriber setup for the CLI and embedding applications.
//!
//! Levels are matched on their first letter, so `d`, `dbg` and `DEBUG`
//! all select debug output. `fatal` maps to `error`, the most severe level
//! `tracing` knows about.

use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use thiserror::Error;
use tracing::{error, Level};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LogConfig {
    /// Level name (`fatal`, `error`, `warn`, `info`, `debug`, `trace`).
    pub level: String,
    /// Append log lines to this file as well as the console.
    pub log_file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "fatal".to_string(),
            log_file: None,
        }
    }
}

impl LogConfig {
    /// Config for `level` with console output only.
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            log_file: None,
        }
    }

    /// Also write to `path`.
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }
}

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The log file could not be opened for appending.
    #[error("cannot open log file '{}'", path.display())]
    LogFile {
        /// Requested log file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A global subscriber is already installed.
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Parse a level name by its first letter.
pub fn parse_level(level: &str) -> Option<LevelFilter> {
    let first = level.trim().chars().next()?.to_ascii_lowercase();
    match first {
        'f' | 'e' => Some(LevelFilter::ERROR),
        'w' => Some(LevelFilter::WARN),
        'i' => Some(LevelFilter::INFO),
        'd' => Some(LevelFilter::DEBUG),
        't' => Some(LevelFilter::TRACE),
        _ => None,
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` directives take precedence over the configured level. An
/// unrecognised level falls back to `error`.
pub fn init_logging(config: &LogConfig) -> Result<(), LoggingError> {
    let parsed = parse_level(&config.level);
    let level = parsed.unwrap_or(LevelFilter::ERROR);
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let file_layer = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LoggingError::LogFile {
                    path: path.clone(),
                    source,
                })?;
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_thread_ids(true),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_thread_ids(true),
        )
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    if parsed.is_none() {
        error!(level = %config.level, "Illegal log level, using error");
    }
    Ok(())
}

/// Whether debug events are currently recorded.
///
/// Guards formatting that is only worth doing for debug output.
pub fn debug_enabled() -> bool {
    tracing::enabled!(Level::DEBUG)
}
