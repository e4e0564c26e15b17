//! Telemetry error types.

use thiserror::Error;

/// Errors that can occur while installing the logging subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Invalid level, directive, or format.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A global subscriber was already installed.
    #[error("Initialization error: {0}")]
    InitError(String),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
