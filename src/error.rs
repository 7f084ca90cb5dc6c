use std::path::PathBuf;

use thiserror::Error;

use crate::response::Envelope;

/// Result type for cuOpt client operations
pub type Result<T> = std::result::Result<T, CuOptError>;

/// Errors that can occur when talking to a cuOpt service
#[derive(Error, Debug)]
pub enum CuOptError {
    /// File extension not in the supported set
    #[error(
        "File extension {0} is unsupported. \
         Supported file extensions are .json, .zlib, .msgpack, or .pickle"
    )]
    UnsupportedFormat(String),

    /// The service answered with a non-success HTTP status
    #[error("cuOpt Error: {reason} - {status}: {message}")]
    Service {
        reason: String,
        status: u16,
        message: String,
    },

    /// Polling budget ran out before a terminal result arrived.
    ///
    /// The envelope holds the `reqId` needed to resume with `repoll`.
    #[error("{0}")]
    PollTimeout(Envelope),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// A problem file could not be read
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Response body could not be decoded
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// Payload could not be encoded
    #[error("Failed to encode payload: {0}")]
    Encode(String),

    /// Invalid URL derived from the configuration
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Invalid call arguments
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid client configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CuOptError {
    /// Request id carried by a poll timeout, if any.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::PollTimeout(envelope) => envelope.request_id(),
            _ => None,
        }
    }

    /// Envelope carried by a poll timeout, if any.
    pub fn envelope(&self) -> Option<&Envelope> {
        match self {
            Self::PollTimeout(envelope) => Some(envelope),
            _ => None,
        }
    }
}

impl From<rmp_serde::encode::Error> for CuOptError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        CuOptError::Encode(err.to_string())
    }
}

impl From<rmpv::encode::Error> for CuOptError {
    fn from(err: rmpv::encode::Error) -> Self {
        CuOptError::Encode(err.to_string())
    }
}
