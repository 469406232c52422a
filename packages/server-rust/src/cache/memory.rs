//! In-process [`CacheGateway`] backed by [`DashMap`].
//!
//! Used in tests and single-node development. Expiry is evaluated against an
//! injected [`ClockSource`], so deadlines can be crossed deterministically.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futuretech_core::{ClockSource, SystemClock};

use super::{CacheError, CacheGateway};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Bytes,
    expires_at: DateTime<Utc>,
}

/// In-memory cache with passive, clock-driven expiry.
pub struct InMemoryCache {
    entries: DashMap<String, CacheEntry>,
    clock: Arc<dyn ClockSource>,
    available: AtomicBool,
}

impl InMemoryCache {
    /// Creates an empty cache using the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty cache that reads time from `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn ClockSource>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            available: AtomicBool::new(true),
        }
    }

    /// Simulates the backend going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of stored entries, including expired ones not yet evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Deadline of the entry under `key`, if one is stored.
    #[must_use]
    pub fn expires_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.entries.get(key).map(|entry| entry.expires_at)
    }

    fn check_available(&self) -> Result<(), CacheError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::Unavailable {
                reason: "in-memory cache switched off".to_string(),
            })
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheGateway for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        self.check_available()?;
        let now = self.clock.now();

        if let Some(entry) = self.entries.get(key) {
            if now < entry.expires_at {
                return Ok(Some(entry.value.clone()));
            }
        } else {
            return Ok(None);
        }

        // Expired: evict unless a concurrent writer already replaced it.
        self.entries
            .remove_if(key, |_, entry| now >= entry.expires_at);
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        expires_at: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        self.check_available()?;
        self.entries
            .insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }
}
