//! Gate error types.

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// Errors raised by the gate sockets.
///
/// Per-message problems never surface here: they are answered with an
/// `error` reply and the connection stays open.
#[derive(Debug, Error)]
pub enum GateError {
    /// A socket could not be bound.
    #[error("failed to bind {path}: {source}")]
    Bind {
        /// Socket path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// I/O error on a connection or listener.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The line framing failed.
    #[error("framing error: {0}")]
    Framing(#[from] LinesCodecError),
}

/// Result type for gate operations.
pub type GateResult<T> = Result<T, GateError>;
