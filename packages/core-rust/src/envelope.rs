//! Outgoing message envelope and its header table.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Longest header key a broker accepts (AMQP short string).
pub const MAX_HEADER_KEY_LEN: usize = 255;

/// Content type of every body produced by this crate.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Scalar header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Str(String),
    Bool(bool),
    Int(i64),
    Bytes(Vec<u8>),
}

impl HeaderValue {
    /// Returns the string payload, if this is a string header.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

/// A header was refused by its carrier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InjectionError {
    #[error("header key must not be empty")]
    EmptyKey,
    #[error("header key {key:?} exceeds 255 bytes")]
    KeyTooLong { key: String },
    #[error("header {key:?} rejected: {reason}")]
    Rejected { key: String, reason: String },
}

/// Write access to a header table, used as the injection target.
pub trait HeaderCarrier {
    /// Insert or replace a header, returning the value it replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if the carrier cannot hold the key or value. The
    /// carrier is left unchanged in that case.
    fn try_set(&mut self, key: &str, value: HeaderValue)
        -> Result<Option<HeaderValue>, InjectionError>;

    /// Remove a header, returning its previous value.
    fn remove(&mut self, key: &str) -> Option<HeaderValue>;
}

/// Header table of a [`MessageEnvelope`].
///
/// The table is absent until the first header is written, mirroring the
/// broker's optional `headers` property: an envelope without headers is
/// published without a header table at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageHeaders {
    entries: Option<BTreeMap<String, HeaderValue>>,
}

impl MessageHeaders {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` until the first successful insert.
    #[must_use]
    pub fn is_absent(&self) -> bool {
        self.entries.is_none()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, BTreeMap::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.entries.as_ref()?.get(key)
    }

    /// Returns the value of a string header.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(HeaderValue::as_str)
    }

    /// Iterates headers in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.entries
            .iter()
            .flat_map(|entries| entries.iter().map(|(k, v)| (k.as_str(), v)))
    }
}

impl HeaderCarrier for MessageHeaders {
    fn try_set(
        &mut self,
        key: &str,
        value: HeaderValue,
    ) -> Result<Option<HeaderValue>, InjectionError> {
        if key.is_empty() {
            return Err(InjectionError::EmptyKey);
        }
        if key.len() > MAX_HEADER_KEY_LEN {
            return Err(InjectionError::KeyTooLong {
                key: key.to_string(),
            });
        }
        Ok(self
            .entries
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value))
    }

    /// Dropping the last header makes the table absent again.
    fn remove(&mut self, key: &str) -> Option<HeaderValue> {
        let entries = self.entries.as_mut()?;
        let removed = entries.remove(key);
        if entries.is_empty() {
            self.entries = None;
        }
        removed
    }
}

/// A message ready to hand to the broker. Built fresh for every publish.
#[derive(Debug, Clone)]
pub struct MessageEnvelope {
    pub headers: MessageHeaders,
    /// Ask the broker to store the message durably before acknowledging.
    pub persistent: bool,
    pub body: Bytes,
    pub content_type: &'static str,
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl MessageEnvelope {
    /// Creates a persistent JSON envelope with no headers.
    #[must_use]
    pub fn persistent_json(body: Bytes, timestamp: DateTime<Utc>) -> Self {
        Self {
            headers: MessageHeaders::new(),
            persistent: true,
            body,
            content_type: JSON_CONTENT_TYPE,
            message_id: Uuid::new_v4(),
            timestamp,
        }
    }
}
