//! Errors raised while relaying a single message.

use thiserror::Error;

/// Every way a message can fail between the socket and the cache.
///
/// `PeerDisconnected` is the normal end of a connection; every other variant is a fault that
/// closes the connection and is counted.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Frame is not valid JSON, lacks a field, or has a payload of the wrong length
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Skip-connection blob is not valid base64 or not a readable tensor archive
    #[error("failed to deserialize skip connections: {0}")]
    Deserialization(String),

    #[error("inference failed: {0}")]
    Inference(String),

    /// Decoder output cannot be read as an image
    #[error("failed to encode image: {0}")]
    Encoding(String),

    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("peer disconnected")]
    PeerDisconnected,

    /// Reading from or writing to the socket failed
    #[error("transport error: {0}")]
    Transport(String),
}

impl RelayError {
    /// Whether this error ends a connection without being counted as a failure.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, RelayError::PeerDisconnected)
    }
}

impl From<redis::RedisError> for RelayError {
    fn from(e: redis::RedisError) -> Self {
        RelayError::CacheUnavailable(e.to_string())
    }
}
