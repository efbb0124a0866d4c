//! Structured logging setup with console and file output.
//!
//! Daily rotating log files when running unattended, console output when
//! attached to a terminal, environment variable override via QUERN_LOG or
//! RUST_LOG.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

/// Logging configuration.
pub struct LogConfig {
    /// Directory for log files.
    pub log_dir: PathBuf,
    /// Whether running in a PTY (affects output destination).
    pub is_pty: bool,
    /// Optional custom log filter.
    pub log_filter: Option<String>,
}

impl LogConfig {
    /// Create a new logging configuration.
    pub fn new(log_dir: PathBuf) -> Self {
        Self { log_dir, is_pty: atty::is(atty::Stream::Stdout), log_filter: None }
    }

    /// Set custom log filter.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }
}

/// Guard that must be held for the lifetime of the process.
///
/// Dropping this guard flushes pending log entries.
pub struct LoggingGuard {
    _worker_guard: Option<WorkerGuard>,
}

/// Initialize logging with the given configuration.
///
/// If file logging initialization fails, falls back to console-only.
pub fn init_logging(config: LogConfig) -> LoggingGuard {
    if config.is_pty {
        return init_stdout_logging(config.log_filter.as_deref());
    }

    match init_file_logging(&config) {
        Ok(guard) => LoggingGuard { _worker_guard: Some(guard) },
        Err(e) => {
            eprintln!("Warning: failed to initialize file logging: {e}. Using console only.");
            init_stdout_logging(config.log_filter.as_deref())
        }
    }
}

fn init_stdout_logging(filter: Option<&str>) -> LoggingGuard {
    tracing_subscriber::fmt()
        .with_env_filter(build_env_filter(filter))
        .with_ansi(true)
        .with_target(false)
        .init();
    LoggingGuard { _worker_guard: None }
}

fn init_file_logging(config: &LogConfig) -> Result<WorkerGuard, std::io::Error> {
    std::fs::create_dir_all(&config.log_dir)?;
    let appender = RollingFileAppender::new(Rotation::DAILY, &config.log_dir, "quern.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(build_env_filter(config.log_filter.as_deref()))
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(guard)
}

fn build_env_filter(filter: Option<&str>) -> EnvFilter {
    if let Some(filter) = filter {
        return EnvFilter::new(filter);
    }
    if let Ok(var) = std::env::var("QUERN_LOG") {
        return EnvFilter::new(var);
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
