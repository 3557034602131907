//! Error types for Neontrack Core

use thiserror::Error;

/// Result type alias for tracking operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failure raised by a page-level aggregator call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("aggregator call `{method}` failed: {message}")]
pub struct AggregatorError {
    pub method: &'static str,
    pub message: String,
}

impl AggregatorError {
    pub fn new(method: &'static str, message: impl Into<String>) -> Self {
        Self {
            method,
            message: message.into(),
        }
    }
}

/// Tracker error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (fatal to the triggering action)
    #[error("Video id attribute `{attribute}` missing on player element")]
    MissingVideoIdAttribute { attribute: String },

    #[error("Video id `{value}` does not match pattern `{pattern}`")]
    VideoIdPatternMismatch { pattern: String, value: String },

    #[error("Invalid video id pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Delegation errors (recovered by direct send)
    #[error(transparent)]
    Delegation(#[from] AggregatorError),

    // Session errors
    #[error("Tracking session has been disposed")]
    Disposed,

    #[error("No tokio runtime available for {0}")]
    NoRuntime(&'static str),

    // Network errors
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    // Data errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true for errors caused by publisher configuration
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Error::MissingVideoIdAttribute { .. }
                | Error::VideoIdPatternMismatch { .. }
                | Error::InvalidPattern { .. }
                | Error::InvalidConfig(_)
        )
    }

    /// Returns the error code for diagnostics
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::MissingVideoIdAttribute { .. } => "VIDEO_ID_MISSING",
            Error::VideoIdPatternMismatch { .. } => "VIDEO_ID_MISMATCH",
            Error::InvalidPattern { .. } => "INVALID_PATTERN",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Delegation(_) => "DELEGATION",
            Error::Disposed => "DISPOSED",
            Error::NoRuntime(_) => "NO_RUNTIME",
            Error::Http(_) => "HTTP",
            Error::Serialization(_) => "SERIALIZATION",
            Error::Io(_) => "IO",
        }
    }
}
