//! Warmpath error types

use std::time::Duration;

/// Warmpath error types
///
/// Hot-path components (policy engine, bandit, sequence miner, advisors)
/// never surface these to report-handling callers; they degrade to the
/// heuristic policy instead. Model-lifecycle calls return them as
/// structured failures.
#[derive(Debug, thiserror::Error)]
pub enum WarmpathError {
    // Reasoning service / network errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("reasoning service disabled")]
    ServiceDisabled,

    #[error("empty response from reasoning service")]
    EmptyResponse,

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    // Model lifecycle errors
    #[error("model version {0} not found")]
    VersionNotFound(String),

    #[error("no canary to rollback")]
    NoCanary,

    #[error("no models found")]
    NoModels,

    #[error("no previous version found to rollback to")]
    NoPreviousVersion,

    #[error("training failed: {0}")]
    Training(String),
}

impl WarmpathError {
    /// Whether the error is worth retrying later.
    ///
    /// Rate limits, transport failures, 5xx responses and empty bodies are
    /// transient. Everything else is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            WarmpathError::RateLimited { .. }
            | WarmpathError::Http(_)
            | WarmpathError::EmptyResponse => true,
            WarmpathError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Provider-supplied retry hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            WarmpathError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Result type alias for Warmpath operations
pub type Result<T> = std::result::Result<T, WarmpathError>;
