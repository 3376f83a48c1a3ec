//! DI "Interfaces"

use crate::core::error::RelayError;
use async_trait::async_trait;

/// Outcome of one successfully relayed message.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconstruction {
    pub session_id: String,
    /// `data:image/png;base64,...`
    pub image_uri: String,
}

#[async_trait]
pub trait ReconstructionService: Send + Sync {
    /// Runs one raw client frame through decoding, inference, image encoding and cache
    /// publishing.
    ///
    /// Returns `Err` at the first stage that fails; nothing is published in that case.
    async fn reconstruct(&self, raw_message: &str) -> Result<Reconstruction, RelayError>;
}
