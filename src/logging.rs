//! Logging setup
//!
//! Console output on stderr plus an append-only plain-text log file in the
//! data directory. `RUST_LOG` overrides the configured level.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Failed to open log file {path}: {source}")]
    FileError {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid log level '{0}'")]
    InvalidLevel(String),
    #[error("Failed to install logger: {0}")]
    InitError(String),
}

/// Filter from `RUST_LOG`, else `level` (`debug` when verbose)
pub fn build_filter(level: &str, verbose: bool) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let level = if verbose { "debug" } else { level };
    EnvFilter::try_new(level).map_err(|_| LoggingError::InvalidLevel(level.to_string()))
}

pub fn init(level: &str, verbose: bool, log_file: &Path) -> Result<(), LoggingError> {
    let filter = build_filter(level, verbose)?;

    if let Some(parent) = log_file.parent() {
        std::fs::create_dir_all(parent).map_err(|e| LoggingError::FileError {
            path: parent.display().to_string(),
            source: e,
        })?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .map_err(|e| LoggingError::FileError {
            path: log_file.display().to_string(),
            source: e,
        })?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_file(true)
                .with_line_number(true)
                .with_writer(Mutex::new(file)),
        )
        .try_init()
        .map_err(|e| LoggingError::InitError(e.to_string()))
}

/// Console-only fallback when the data directory is unusable
pub fn init_console(level: &str, verbose: bool) -> Result<(), LoggingError> {
    tracing_subscriber::registry()
        .with(build_filter(level, verbose)?)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .map_err(|e| LoggingError::InitError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_accepts_levels() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        assert!(build_filter("info", false).is_ok());
        assert_eq!(build_filter("warn", true).unwrap().to_string(), "debug");
        assert!(build_filter("vpnctl=trace,warn", false).is_ok());
    }

    #[test]
    fn test_build_filter_rejects_garbage() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        assert!(matches!(
            build_filter("vpnctl=loud", false),
            Err(LoggingError::InvalidLevel(_))
        ));
    }
}
