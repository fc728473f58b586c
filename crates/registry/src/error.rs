//! Error types for the job registry

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while managing jobs
#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    /// I/O error with context
    #[error("I/O error during {operation}: {source}")]
    #[diagnostic(code(shelf::registry::io))]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path involved, if any
        path: Option<Box<Path>>,
        /// Operation being performed
        operation: String,
    },

    /// Job record serialization or deserialization error
    #[error("serialization error: {message}")]
    #[diagnostic(code(shelf::registry::serialization))]
    Serialization {
        /// What went wrong
        message: String,
    },

    /// Registry configuration error
    #[error("configuration error: {message}")]
    #[diagnostic(code(shelf::registry::configuration))]
    Configuration {
        /// What went wrong
        message: String,
    },

    /// The job queue has shut down and no longer accepts submissions
    #[error("job queue is closed")]
    #[diagnostic(code(shelf::registry::queue_closed))]
    QueueClosed,
}

impl Error {
    /// Create an I/O error with operation context
    pub fn io(source: std::io::Error, path: impl AsRef<Path>, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

/// Result alias for registry operations
pub type Result<T> = std::result::Result<T, Error>;
