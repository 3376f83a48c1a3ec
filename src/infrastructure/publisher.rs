//! Hands finished reconstructions to the frontend through the shared cache.

use crate::core::config::Settings;
use crate::core::error::RelayError;
use crate::infrastructure::entities::CacheRecord;
use crate::infrastructure::traits::CacheStore;
use di::{Ref, injectable};
use log::debug;
use std::time::Duration;

pub const CACHE_KEY_PREFIX: &str = "reconstructed:";
pub const CACHE_TTL: Duration = Duration::from_secs(600);

#[injectable]
pub struct CachePublisher {
    store: Ref<dyn CacheStore>,
    settings: Ref<Settings>,
}

impl CachePublisher {
    pub fn new(store: Ref<dyn CacheStore>, settings: Ref<Settings>) -> CachePublisher {
        CachePublisher { store, settings }
    }

    /// The one key every session writes to.
    ///
    /// Built from the configured constant, not from the session id, so concurrent sessions
    /// overwrite each other and the last write wins.
    pub fn key(&self) -> String {
        format!("{CACHE_KEY_PREFIX}{}", self.settings.cache_key)
    }

    pub async fn publish(&self, session_id: &str, image_uri: &str) -> Result<(), RelayError> {
        let record = CacheRecord::reconstructed_image(session_id, image_uri);
        let value = serde_json::to_string(&record)
            .map_err(|e| RelayError::CacheUnavailable(e.to_string()))?;

        let key = self.key();
        self.store.set_ex(&key, &value, CACHE_TTL).await?;
        debug!("Published reconstruction for session {session_id} to {key}");
        Ok(())
    }

    /// Current record under the shared key, if any.
    pub async fn latest(&self) -> Result<Option<CacheRecord>, RelayError> {
        match self.store.get(&self.key()).await? {
            Some(value) => serde_json::from_str(&value)
                .map(Some)
                .map_err(|e| RelayError::CacheUnavailable(e.to_string())),
            None => Ok(None),
        }
    }
}
