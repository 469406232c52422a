//! Distributed cache gateway.
//!
//! [`CacheGateway`] is the pipeline's only view of the cache: get and set a
//! named blob with an absolute expiration. Adapters:
//!
//! - [`InMemoryCache`]: `DashMap` store with clock-driven expiry
//! - [`RedisCache`] (feature `redis`): Redis via a multiplexed connection manager

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

pub use memory::InMemoryCache;
#[cfg(feature = "redis")]
pub use self::redis::RedisCache;

/// Errors returned by cache backends.
///
/// A missing key is not an error: [`CacheGateway::get`] returns `Ok(None)`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("cache unavailable: {reason}")]
    Unavailable { reason: String },
    #[error("cache call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl CacheError {
    pub(crate) fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            reason: err.to_string(),
        }
    }
}

/// Blob cache keyed by string with absolute-deadline expiration.
///
/// Entries expire passively: the backend evicts them once `expires_at` has
/// passed. Callers never delete entries.
#[async_trait]
pub trait CacheGateway: Send + Sync {
    /// Fetch the value stored under `key`, or `None` on a miss.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

    /// Store `value` under `key` until `expires_at`, replacing any previous value.
    async fn set(&self, key: &str, value: Bytes, expires_at: DateTime<Utc>)
        -> Result<(), CacheError>;
}
