//! Queue publisher: declare-then-publish over a request-scoped channel.

use std::sync::Arc;
use std::time::Duration;

use futuretech_core::MessageEnvelope;
use tracing::debug;

use crate::broker::{
    BrokerChannel, BrokerConnection, BrokerError, PublishOptions, QueueOptions, DEFAULT_EXCHANGE,
};

/// Publishes envelopes to durable queues through the default exchange.
///
/// Every call runs the full sequence on a fresh channel:
/// 1. open a channel on the shared connection
/// 2. declare the queue durable, non-exclusive, non-auto-delete
/// 3. publish mandatory + persistent with routing key = queue name
/// 4. release the channel, on success and on every error path
///
/// Nothing is retried here; the caller decides what a failure means.
#[derive(Clone)]
pub struct QueuePublisher {
    connection: Arc<dyn BrokerConnection>,
    timeout: Duration,
}

impl QueuePublisher {
    /// `timeout` bounds the whole open/declare/publish/close sequence.
    #[must_use]
    pub fn new(connection: Arc<dyn BrokerConnection>, timeout: Duration) -> Self {
        Self {
            connection,
            timeout,
        }
    }

    /// Declare `queue` and publish `envelope` to it.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's [`BrokerError`], or
    /// [`BrokerError::Timeout`] if the sequence exceeds the configured bound.
    /// On timeout the in-flight channel is dropped, which releases it.
    pub async fn publish(&self, queue: &str, envelope: &MessageEnvelope) -> Result<(), BrokerError> {
        match tokio::time::timeout(self.timeout, self.publish_scoped(queue, envelope)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(BrokerError::Timeout {
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    async fn publish_scoped(
        &self,
        queue: &str,
        envelope: &MessageEnvelope,
    ) -> Result<(), BrokerError> {
        let mut channel = self.connection.open_channel().await?;
        let outcome = declare_and_publish(channel.as_mut(), queue, envelope).await;

        match channel.close().await {
            Ok(()) => {}
            // A publish error is the more useful one to surface.
            Err(err) if outcome.is_err() => {
                debug!(error = %err, "channel close failed after publish error");
            }
            Err(err) => return Err(err),
        }
        outcome
    }
}

async fn declare_and_publish(
    channel: &mut dyn BrokerChannel,
    queue: &str,
    envelope: &MessageEnvelope,
) -> Result<(), BrokerError> {
    channel.declare_queue(queue, QueueOptions::durable()).await?;
    channel
        .publish(
            DEFAULT_EXCHANGE,
            queue,
            PublishOptions { mandatory: true },
            envelope,
        )
        .await?;
    debug!(
        queue,
        message_id = %envelope.message_id,
        bytes = envelope.body.len(),
        "message published"
    );
    Ok(())
}
