//! Infrastructure traits, used for DI on higher levels

use crate::core::error::RelayError;
use async_trait::async_trait;
use std::time::Duration;

/// Shared key-value store with per-key expiry.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Writes `value` under `key`, replacing any previous value, expiring after `ttl`.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), RelayError>;

    async fn get(&self, key: &str) -> Result<Option<String>, RelayError>;
}
