//! Audit-related error types.

use thiserror::Error;

/// Errors that can occur with audit logging.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Storage error.
    #[error("storage error: {0}")]
    StorageError(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// The record cannot be written as a final decision.
    #[error("invalid audit record: {reason}")]
    InvalidRecord {
        /// Why the record was rejected.
        reason: String,
    },

    /// I/O error on the log files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for audit operations.
pub type AuditResult<T> = Result<T, AuditError>;
