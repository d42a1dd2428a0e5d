//! Error types for linksort.
//!
//! Library crates use [`LinksortError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all linksort operations.
#[derive(Debug, thiserror::Error)]
pub enum LinksortError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to the links API.
    #[error("network error: {0}")]
    Network(String),

    /// Response body or model output could not be decoded.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Classifier transport or API error.
    #[error("classifier error: {0}")]
    Classifier(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad argument, schema mismatch, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The run was cancelled before it finished.
    #[error("operation cancelled")]
    Cancelled,
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, LinksortError>;

impl LinksortError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for [`LinksortError::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = LinksortError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = LinksortError::Classifier("HTTP 500".into());
        assert_eq!(err.to_string(), "classifier error: HTTP 500");

        let err = LinksortError::validation("batch size must be at least 1");
        assert!(err.to_string().contains("batch size"));
    }

    #[test]
    fn cancelled_is_detectable() {
        assert!(LinksortError::Cancelled.is_cancelled());
        assert!(!LinksortError::Network("boom".into()).is_cancelled());
    }
}
