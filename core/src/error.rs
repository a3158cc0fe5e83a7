//! Error types for the portwatch-core library.

use thiserror::Error;

/// Result type alias for portwatch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while sampling sockets and reacting to violations.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to execute a system command.
    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    /// Failed to parse command output.
    #[error("Failed to parse output: {0}")]
    ParseError(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
