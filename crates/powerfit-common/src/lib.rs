//! # PowerFit Common
//!
//! Shared error type, logging setup and retry helpers for the PowerFit offline shell.
//!
//! ## Features
//!
//! - Unified error type with categories
//! - Logging configuration and setup
//! - Retry and timeout utilities

use std::time::Duration;
use thiserror::Error;

pub mod logging;
pub mod retry;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use retry::{retry_if, with_timeout, RetryConfig};

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type for the offline shell.
#[derive(Error, Debug)]
pub enum ShellError {
    /// Configuration errors.
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeout errors.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl ShellError {
    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error with source.
    pub fn config_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Get the error category for reporting.
    pub fn category(&self) -> &'static str {
        match self {
            ShellError::Config { .. } => "config",
            ShellError::Io(_) => "io",
            ShellError::Timeout(_) => "timeout",
            ShellError::InvalidArgument(_) => "invalid_argument",
        }
    }
}

/// Result type alias for shell operations.
pub type Result<T> = std::result::Result<T, ShellError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(ShellError::config("test").category(), "config");
        assert_eq!(
            ShellError::Timeout(Duration::from_secs(1)).category(),
            "timeout"
        );
        assert_eq!(
            ShellError::InvalidArgument("x".into()).category(),
            "invalid_argument"
        );
    }

    #[test]
    fn test_source_is_kept() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = ShellError::config_with_source("reading config", io);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_io_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: ShellError = io.into();
        assert_eq!(err.category(), "io");
        assert!(err.to_string().contains("denied"));
    }
}
