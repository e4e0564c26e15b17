//! Error types for policy evaluation and rule storage.

/// Errors that can occur while validating, storing, or persisting rules.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// A rule violates a structural invariant (missing scope owner, empty tool).
    #[error("invalid rule: {reason}")]
    InvalidRule {
        /// Why the rule was rejected.
        reason: String,
    },

    /// A rule pattern is not a valid glob.
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Parser message.
        reason: String,
    },

    /// Reading or writing the rules file failed.
    #[error("rule persistence failed for {path}: {source}")]
    Persistence {
        /// Rules file path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The rules document could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PolicyError {
    pub(crate) fn invalid_rule(reason: impl Into<String>) -> Self {
        Self::InvalidRule {
            reason: reason.into(),
        }
    }
}

/// Result type for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;
