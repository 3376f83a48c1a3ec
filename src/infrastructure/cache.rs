//! Cache store backends

use crate::core::config::Settings;
use crate::core::error::RelayError;
use crate::infrastructure::traits::CacheStore;
use async_trait::async_trait;
use log::info;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::Instant;

/// Redis-backed store. The connection is opened on first use and re-established by the
/// connection manager after failures.
pub struct RedisCache {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
}

impl RedisCache {
    pub fn new(host: &str, port: u16, password: &str) -> Result<RedisCache, RelayError> {
        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(host.to_owned(), port),
            redis: RedisConnectionInfo {
                password: Some(password.to_owned()).filter(|p| !p.is_empty()),
                ..Default::default()
            },
        };

        Ok(RedisCache {
            client: redis::Client::open(info)?,
            connection: OnceCell::new(),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<RedisCache, RelayError> {
        RedisCache::new(
            &settings.redis_host,
            settings.redis_port,
            &settings.redis_password,
        )
    }

    async fn connection(&self) -> Result<ConnectionManager, RelayError> {
        let connection = self
            .connection
            .get_or_try_init(|| async {
                let manager = ConnectionManager::new(self.client.clone()).await?;
                info!("Connected to cache store.");
                Ok::<_, RelayError>(manager)
            })
            .await?;
        Ok(connection.clone())
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), RelayError> {
        let mut connection = self.connection().await?;
        connection
            .set_ex::<_, _, ()>(key, value, ttl.as_secs())
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, RelayError> {
        let mut connection = self.connection().await?;
        Ok(connection.get(key).await?)
    }
}

/// Process-local store with the same expiry semantics as Redis `SET .. EX`.
#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl InMemoryCache {
    pub fn new() -> InMemoryCache {
        InMemoryCache::default()
    }

    /// Remaining lifetime of `key`, if it is present and not yet expired.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let entries = self.entries.lock().ok()?;
        let (_, expires_at) = entries.get(key)?;
        expires_at.checked_duration_since(Instant::now())
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), RelayError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| RelayError::CacheUnavailable(e.to_string()))?;
        entries.insert(key.to_owned(), (value.to_owned(), Instant::now() + ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, RelayError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| RelayError::CacheUnavailable(e.to_string()))?;

        let expired = match entries.get(key) {
            Some((_, expires_at)) => *expires_at <= Instant::now(),
            None => return Ok(None),
        };
        if expired {
            entries.remove(key);
            return Ok(None);
        }

        Ok(entries.get(key).map(|(value, _)| value.clone()))
    }
}
