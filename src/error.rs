//! Error types for promsink

use std::fmt;

/// Result type alias for promsink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for promsink
#[derive(Debug)]
pub enum Error {
    /// Request body is not a valid snappy block
    Compression(String),
    /// Decompressed body is not a valid remote-write message
    Schema(String),
    /// Sink open/write/flush errors and marker stat errors
    Io(std::io::Error),
    /// Record encode/decode errors
    Serialization(String),
    /// Configuration errors
    Config(String),
    /// Internal error
    Internal(String),
}

impl Error {
    /// True for errors caused by the request payload rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Compression(_) | Error::Schema(_))
    }

    /// Short label used for metrics attributes.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Compression(_) => "compression",
            Error::Schema(_) => "schema",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
            Error::Config(_) => "config",
            Error::Internal(_) => "internal",
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Compression(msg) => write!(f, "Compression error: {}", msg),
            Error::Schema(msg) => write!(f, "Schema error: {}", msg),
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<snap::Error> for Error {
    fn from(e: snap::Error) -> Self {
        Error::Compression(e.to_string())
    }
}

impl From<prost::DecodeError> for Error {
    fn from(e: prost::DecodeError) -> Self {
        Error::Schema(e.to_string())
    }
}
