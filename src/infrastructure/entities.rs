//! Cache entities

use serde::{Deserialize, Serialize};

pub const RECONSTRUCTED_IMAGE: &str = "reconstructed_image";

/// Value written to the cache for the frontend to pick up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub session_id: String,
    /// `data:image/png;base64,...`
    pub image_base64: String,
}

impl CacheRecord {
    pub fn reconstructed_image(session_id: &str, image_uri: &str) -> CacheRecord {
        CacheRecord {
            kind: RECONSTRUCTED_IMAGE.to_owned(),
            session_id: session_id.to_owned(),
            image_base64: image_uri.to_owned(),
        }
    }
}
