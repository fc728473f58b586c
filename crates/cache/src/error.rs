//! Error types for the cache crate

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for metadata store and cache maintenance operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error during store or cache operations
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(shelf::cache::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "lock")
        operation: String,
    },

    /// Store configuration or layout error
    #[error("Cache configuration error: {message}")]
    #[diagnostic(code(shelf::cache::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(code(shelf::cache::serialization))]
    Serialization {
        /// Error message describing the serialization issue
        message: String,
    },
}

impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create a serialization error
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, Error>;
