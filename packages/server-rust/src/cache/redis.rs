//! Redis-backed [`CacheGateway`].
//!
//! Uses a [`ConnectionManager`], which multiplexes one connection across all
//! callers and reconnects on failure. Expiration is delegated to Redis with
//! `SET .. PXAT`, so the deadline is absolute and evaluated by the server.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use tracing::info;

use super::{CacheError, CacheGateway};
use crate::config::redact_url;

/// Cache gateway over a Redis server.
#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    /// Connects to the Redis server at `url` (e.g. `redis://127.0.0.1:6379`).
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Unavailable`] if the URL is invalid or the
    /// server cannot be reached.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(CacheError::unavailable)?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(CacheError::unavailable)?;
        info!(url = %redact_url(url), "connected to redis cache");
        Ok(Self { manager })
    }
}

#[async_trait]
impl CacheGateway for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let mut conn = self.manager.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(CacheError::unavailable)?;
        Ok(value.map(Bytes::from))
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        expires_at: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        let () = redis::cmd("SET")
            .arg(key)
            .arg(value.as_ref())
            .arg("PXAT")
            .arg(expires_at.timestamp_millis())
            .query_async(&mut conn)
            .await
            .map_err(CacheError::unavailable)?;
        Ok(())
    }
}
