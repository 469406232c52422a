//! In-process broker with AMQP declare and default-exchange routing semantics.
//!
//! Queues live in a shared registry. Publishing to the default exchange routes
//! by queue name; a mandatory message with no matching queue is reported as
//! unroutable. An availability switch simulates broker outages, and every
//! channel is counted so tests can assert that none leak.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futuretech_core::MessageEnvelope;
use parking_lot::Mutex;

use super::{
    BrokerChannel, BrokerConnection, BrokerError, PublishOptions, QueueOptions, DEFAULT_EXCHANGE,
};

#[derive(Debug)]
struct QueueState {
    options: QueueOptions,
    messages: Vec<MessageEnvelope>,
}

#[derive(Debug, Default)]
struct BrokerShared {
    queues: Mutex<HashMap<String, QueueState>>,
    offline: AtomicBool,
    open_channels: AtomicUsize,
    channels_opened: AtomicUsize,
}

impl BrokerShared {
    fn check_online(&self) -> Result<(), BrokerError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(BrokerError::Unavailable {
                reason: "in-memory broker is offline".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

/// In-memory broker connection. Clones share the same queues.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    shared: Arc<BrokerShared>,
}

impl InMemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a broker outage (`false`) or recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.shared.offline.store(!available, Ordering::SeqCst);
    }

    /// Messages enqueued on `queue`, oldest first.
    #[must_use]
    pub fn messages(&self, queue: &str) -> Vec<MessageEnvelope> {
        self.shared
            .queues
            .lock()
            .get(queue)
            .map(|q| q.messages.clone())
            .unwrap_or_default()
    }

    /// Options `queue` was declared with, if it exists.
    #[must_use]
    pub fn queue_options(&self, queue: &str) -> Option<QueueOptions> {
        self.shared.queues.lock().get(queue).map(|q| q.options)
    }

    /// Channels currently open.
    #[must_use]
    pub fn open_channels(&self) -> usize {
        self.shared.open_channels.load(Ordering::SeqCst)
    }

    /// Channels opened over the broker's lifetime.
    #[must_use]
    pub fn channels_opened(&self) -> usize {
        self.shared.channels_opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerConnection for InMemoryBroker {
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError> {
        self.shared.check_online()?;
        self.shared.open_channels.fetch_add(1, Ordering::SeqCst);
        self.shared.channels_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemoryChannel {
            shared: Arc::clone(&self.shared),
        }))
    }
}

/// Channel handle. Decrements the open-channel count when dropped.
struct InMemoryChannel {
    shared: Arc<BrokerShared>,
}

impl Drop for InMemoryChannel {
    fn drop(&mut self) {
        self.shared.open_channels.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    async fn declare_queue(
        &mut self,
        queue: &str,
        options: QueueOptions,
    ) -> Result<(), BrokerError> {
        self.shared.check_online()?;
        let mut queues = self.shared.queues.lock();
        match queues.get(queue) {
            Some(existing) if existing.options != options => Err(BrokerError::DeclareMismatch {
                queue: queue.to_string(),
                reason: format!(
                    "declared as {:?}, requested {:?}",
                    existing.options, options
                ),
            }),
            Some(_) => Ok(()),
            None => {
                queues.insert(
                    queue.to_string(),
                    QueueState {
                        options,
                        messages: Vec::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        options: PublishOptions,
        envelope: &MessageEnvelope,
    ) -> Result<(), BrokerError> {
        self.shared.check_online()?;
        let mut queues = self.shared.queues.lock();
        let target = if exchange == DEFAULT_EXCHANGE {
            queues.get_mut(routing_key)
        } else {
            None
        };

        match target {
            Some(queue) => {
                queue.messages.push(envelope.clone());
                Ok(())
            }
            None if options.mandatory => Err(BrokerError::Unroutable {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
            }),
            // Non-mandatory unroutable messages are silently dropped.
            None => Ok(()),
        }
    }

    async fn close(self: Box<Self>) -> Result<(), BrokerError> {
        // Drop does the bookkeeping.
        Ok(())
    }
}
