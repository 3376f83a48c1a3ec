//! Parsing of inbound latent messages.

use crate::core::error::RelayError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use candle_core::{Device, Tensor};
use serde::Deserialize;
use std::collections::HashMap;

pub const ANONYMOUS_SESSION: &str = "anonymous";

/// Auxiliary encoder activations handed to the decoder untouched.
pub type SkipConnections = HashMap<String, Tensor>;

/// Wire shape of a client frame.
#[derive(Deserialize, Debug)]
pub struct InboundMessage {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub session_id: Option<String>,
    pub payload: Vec<f32>,
    /// base64 of a safetensors archive
    pub skip_connections: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestMetadata {
    pub kind: Option<String>,
    pub session_id: String,
}

/// A `(1, latent_dim)` f32 tensor on the compute device.
#[derive(Debug, Clone)]
pub struct LatentTensor(Tensor);

impl LatentTensor {
    pub fn new(values: Vec<f32>, device: &Device) -> candle_core::Result<LatentTensor> {
        let len = values.len();
        Tensor::from_vec(values, (1, len), device).map(LatentTensor)
    }

    pub fn len(&self) -> usize {
        self.0.elem_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_tensor(&self) -> &Tensor {
        &self.0
    }
}

#[derive(Debug)]
pub struct DecodedMessage {
    pub latent: LatentTensor,
    pub skip: SkipConnections,
    pub request: RequestMetadata,
}

/// Parses a raw text frame into tensors placed on `device`.
pub fn decode(raw: &str, latent_dim: usize, device: &Device) -> Result<DecodedMessage, RelayError> {
    let message: InboundMessage =
        serde_json::from_str(raw).map_err(|e| RelayError::MalformedMessage(e.to_string()))?;

    if message.payload.len() != latent_dim {
        return Err(RelayError::MalformedMessage(format!(
            "payload has {} values, expected {latent_dim}",
            message.payload.len()
        )));
    }

    let skip = decode_skip_connections(&message.skip_connections, device)?;
    let latent = LatentTensor::new(message.payload, device)
        .map_err(|e| RelayError::MalformedMessage(e.to_string()))?;

    Ok(DecodedMessage {
        latent,
        skip,
        request: RequestMetadata {
            kind: message.kind,
            session_id: message
                .session_id
                .unwrap_or_else(|| ANONYMOUS_SESSION.to_owned()),
        },
    })
}

pub fn decode_skip_connections(
    encoded: &str,
    device: &Device,
) -> Result<SkipConnections, RelayError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| RelayError::Deserialization(format!("invalid base64: {e}")))?;

    candle_core::safetensors::load_buffer(&bytes, device)
        .map_err(|e| RelayError::Deserialization(e.to_string()))
}
