//! Message broker contract used by the delay queue.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::QueueError;

/// Message handed out by a receive call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Broker-assigned id.
    pub message_id: String,
    /// Receipt that must accompany a delete; changes on every receive.
    pub pop_receipt: String,
    /// Message text.
    pub body: String,
    /// Times the message has been received, including this one.
    pub dequeue_count: u32,
}

/// Broker offering visibility delays, TTLs and receipt-based deletes.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Create a queue; succeeds if it already exists.
    async fn create_queue(&self, queue: &str) -> Result<(), QueueError>;
    /// Drop a queue and its messages.
    async fn delete_queue(&self, queue: &str) -> Result<(), QueueError>;
    /// Enqueue `body`, invisible for `visibility`, discarded after `ttl`.
    async fn put_message(
        &self,
        queue: &str,
        body: String,
        visibility: Duration,
        ttl: Duration,
    ) -> Result<(), QueueError>;
    /// Receive up to `max` visible messages, hiding each for `visibility_timeout`.
    async fn get_messages(
        &self,
        queue: &str,
        max: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;
    /// Delete a received message; fails if the receipt is stale.
    async fn delete_message(
        &self,
        queue: &str,
        message_id: &str,
        pop_receipt: &str,
    ) -> Result<(), QueueError>;
    /// Number of unexpired messages (visible or not).
    async fn message_count(&self, queue: &str) -> Result<usize, QueueError>;
    /// Drop messages past their TTL in every queue; returns how many.
    async fn delete_expired_messages(&self) -> Result<usize, QueueError>;
}

/// Deletes one received message.
#[derive(Clone)]
pub struct AckHandle {
    backend: Arc<dyn QueueBackend>,
    queue: String,
    message_id: String,
    pop_receipt: String,
}

impl AckHandle {
    pub(crate) fn new(backend: Arc<dyn QueueBackend>, queue: &str, message: &ReceivedMessage) -> Self {
        Self {
            backend,
            queue: queue.to_owned(),
            message_id: message.message_id.clone(),
            pop_receipt: message.pop_receipt.clone(),
        }
    }

    /// Acknowledge (delete) the message.
    pub async fn remove(&self) -> Result<(), QueueError> {
        self.backend
            .delete_message(&self.queue, &self.message_id, &self.pop_receipt)
            .await
    }
}

/// A decoded message plus the means to acknowledge it.
pub struct Delivery<M> {
    /// Decoded payload.
    pub payload: M,
    /// Broker-assigned id.
    pub message_id: String,
    /// Times the message has been received.
    pub dequeue_count: u32,
    ack: AckHandle,
}

impl<M> Delivery<M> {
    pub(crate) const fn new(payload: M, message_id: String, dequeue_count: u32, ack: AckHandle) -> Self {
        Self {
            payload,
            message_id,
            dequeue_count,
            ack,
        }
    }

    /// Acknowledge (delete) the message.
    pub async fn remove(&self) -> Result<(), QueueError> {
        self.ack.remove().await
    }
}

impl<M: std::fmt::Debug> std::fmt::Debug for Delivery<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("payload", &self.payload)
            .field("message_id", &self.message_id)
            .field("dequeue_count", &self.dequeue_count)
            .finish_non_exhaustive()
    }
}
