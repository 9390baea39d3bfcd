//! Error types for the streaming engine
//!
//! One library-wide error enum covering transport, decode, sink, and
//! configuration failures. Variants carry owned strings (not source error
//! types) so the enum stays `Clone` and can ride inside `StreamState::Error`
//! through the broadcast event channel.

use thiserror::Error;

/// Streaming engine errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The configured stream URL could not be parsed
    #[error("Invalid stream URL: {0}")]
    InvalidUrl(String),

    /// The HTTP connection could not be established or broke mid-stream
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The server answered with a non-success status
    #[error("HTTP error status: {0}")]
    HttpStatus(u16),

    /// The connect attempt exceeded the configured timeout
    #[error("Connection attempt timed out")]
    Timeout,

    /// Compressed audio could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Audio device or output stream failure
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// The stream ended and the reconnect budget is spent or disabled
    #[error("Connection lost")]
    ConnectionLost,

    /// Configuration file or value problem
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for streaming engine operations
pub type Result<T> = std::result::Result<T, Error>;
