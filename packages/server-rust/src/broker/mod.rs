//! Message broker abstraction: one long-lived connection, many short-lived channels.
//!
//! A [`BrokerConnection`] is shared across requests (`Arc<dyn BrokerConnection>`).
//! Each publish opens its own [`BrokerChannel`], uses it, and releases it;
//! channels are never shared between concurrent requests.
//!
//! Adapters:
//! - [`InMemoryBroker`]: queue registry with AMQP declare/route semantics, for tests
//! - [`AmqpConnection`] (feature `amqp`): RabbitMQ via `lapin`

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod memory;

use async_trait::async_trait;
use futuretech_core::MessageEnvelope;

#[cfg(feature = "amqp")]
pub use amqp::AmqpConnection;
pub use memory::InMemoryBroker;

/// Name of the broker's default (direct-to-queue) exchange.
pub const DEFAULT_EXCHANGE: &str = "";

/// Properties a queue is declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    /// Survive a broker restart.
    pub durable: bool,
    /// Restrict the queue to the declaring connection.
    pub exclusive: bool,
    /// Delete the queue once its last consumer goes away.
    pub auto_delete: bool,
}

impl QueueOptions {
    /// Durable, shared, never auto-deleted.
    #[must_use]
    pub fn durable() -> Self {
        Self {
            durable: true,
            exclusive: false,
            auto_delete: false,
        }
    }
}

/// Flags for a single publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOptions {
    /// Require the broker to report messages that match no queue.
    pub mandatory: bool,
}

/// Errors from the publish path. None of them are retried by the publisher.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    #[error("broker unavailable: {reason}")]
    Unavailable { reason: String },
    #[error("queue {queue:?} already exists with different properties: {reason}")]
    DeclareMismatch { queue: String, reason: String },
    #[error("message to exchange {exchange:?} with routing key {routing_key:?} was unroutable")]
    Unroutable {
        exchange: String,
        routing_key: String,
    },
    #[error("broker refused to accept the message")]
    Nacked,
    #[error("publish timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl BrokerError {
    pub(crate) fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            reason: err.to_string(),
        }
    }
}

/// Long-lived, thread-safe broker connection.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Open a channel for the exclusive use of one caller.
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError>;
}

/// Request-scoped channel over a [`BrokerConnection`].
///
/// Dropping a channel without calling [`close`](BrokerChannel::close)
/// still releases it; `close` exists so normal paths can release it
/// synchronously and observe errors.
#[async_trait]
pub trait BrokerChannel: Send {
    /// Declare `queue` if absent. Declaring an existing queue with the same
    /// options succeeds; different options yield [`BrokerError::DeclareMismatch`].
    async fn declare_queue(&mut self, queue: &str, options: QueueOptions)
        -> Result<(), BrokerError>;

    /// Publish `envelope` to `exchange` with `routing_key`.
    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        options: PublishOptions,
        envelope: &MessageEnvelope,
    ) -> Result<(), BrokerError>;

    /// Release the channel.
    async fn close(self: Box<Self>) -> Result<(), BrokerError>;
}
