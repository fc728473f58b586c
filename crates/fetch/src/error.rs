//! Error types for the fetch boundary

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for fetch operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error while preparing for or inspecting a fetch
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(shelf::fetch::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read_dir", "spawn")
        operation: String,
    },

    /// Destination or tool configuration problem
    #[error("Fetch configuration error: {message}")]
    #[diagnostic(code(shelf::fetch::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// The external tool exited with a non-success status
    #[error("fetch tool exited with {}: {stderr}", status.map_or("unknown status".to_string(), |s| format!("status {s}")))]
    #[diagnostic(
        code(shelf::fetch::tool),
        help("The tool's stderr is captured verbatim above")
    )]
    Tool {
        /// Exit status code, if the process was not killed by a signal
        status: Option<i32>,
        /// Captured standard error from the tool
        stderr: String,
    },

    /// The fetch exceeded its deadline
    #[error("fetch timed out after {seconds} seconds")]
    #[diagnostic(code(shelf::fetch::timeout))]
    Timeout {
        /// Configured timeout in seconds
        seconds: u64,
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
}

/// Result type for fetch operations
pub type Result<T> = std::result::Result<T, Error>;
