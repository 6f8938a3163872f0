//! In-memory message broker with visibility delays and TTLs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::core::delay_queue::{QueueBackend, ReceivedMessage};
use crate::core::QueueError;
use crate::util::clock::{Clock, SystemClock};

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: String,
    body: String,
    visible_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    pop_receipt: Option<String>,
    dequeue_count: u32,
    sequence: u64,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, Vec<StoredMessage>>,
    next_sequence: u64,
}

/// Broker keeping messages in memory, timed by an injectable clock.
///
/// Received messages are hidden until `now + visibility_timeout`; each
/// receive issues a fresh pop receipt and invalidates the previous one.
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay).map_or(DateTime::<Utc>::MAX_UTC, |d| now + d)
}

impl InMemoryBroker {
    /// Broker driven by `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(BrokerState::default()),
            clock,
        }
    }

    /// Bodies of every unexpired message in `queue`, visible or not.
    pub fn peek_bodies(&self, queue: &str) -> Vec<String> {
        let now = self.clock.now();
        self.state
            .lock()
            .queues
            .get(queue)
            .map(|messages| {
                messages
                    .iter()
                    .filter(|m| m.expires_at > now)
                    .map(|m| m.body.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Names of all queues.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().queues.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl QueueBackend for InMemoryBroker {
    async fn create_queue(&self, queue: &str) -> Result<(), QueueError> {
        self.state.lock().queues.entry(queue.to_owned()).or_default();
        Ok(())
    }

    async fn delete_queue(&self, queue: &str) -> Result<(), QueueError> {
        self.state
            .lock()
            .queues
            .remove(queue)
            .map(|_| ())
            .ok_or_else(|| QueueError::QueueNotFound(queue.to_owned()))
    }

    async fn put_message(
        &self,
        queue: &str,
        body: String,
        visibility: Duration,
        ttl: Duration,
    ) -> Result<(), QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        let messages = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::QueueNotFound(queue.to_owned()))?;
        messages.push(StoredMessage {
            message_id: Uuid::new_v4().to_string(),
            body,
            visible_at: after(now, visibility),
            expires_at: after(now, ttl),
            pop_receipt: None,
            dequeue_count: 0,
            sequence,
        });
        Ok(())
    }

    async fn get_messages(
        &self,
        queue: &str,
        max: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let now = self.clock.now();
        let hidden_until = after(now, visibility_timeout);
        let mut state = self.state.lock();
        let messages = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::QueueNotFound(queue.to_owned()))?;
        let mut due: Vec<&mut StoredMessage> = messages
            .iter_mut()
            .filter(|m| m.visible_at <= now && m.expires_at > now)
            .collect();
        due.sort_by_key(|m| (m.visible_at, m.sequence));
        Ok(due
            .into_iter()
            .take(max)
            .map(|message| {
                let receipt = Uuid::new_v4().to_string();
                message.pop_receipt = Some(receipt.clone());
                message.visible_at = hidden_until;
                message.dequeue_count += 1;
                ReceivedMessage {
                    message_id: message.message_id.clone(),
                    pop_receipt: receipt,
                    body: message.body.clone(),
                    dequeue_count: message.dequeue_count,
                }
            })
            .collect())
    }

    async fn delete_message(
        &self,
        queue: &str,
        message_id: &str,
        pop_receipt: &str,
    ) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        let messages = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::QueueNotFound(queue.to_owned()))?;
        let position = messages
            .iter()
            .position(|m| m.message_id == message_id && m.pop_receipt.as_deref() == Some(pop_receipt))
            .ok_or_else(|| QueueError::MessageNotFound(message_id.to_owned()))?;
        messages.remove(position);
        Ok(())
    }

    async fn message_count(&self, queue: &str) -> Result<usize, QueueError> {
        let now = self.clock.now();
        self.state
            .lock()
            .queues
            .get(queue)
            .map(|messages| messages.iter().filter(|m| m.expires_at > now).count())
            .ok_or_else(|| QueueError::QueueNotFound(queue.to_owned()))
    }

    async fn delete_expired_messages(&self) -> Result<usize, QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let mut removed = 0;
        for messages in state.queues.values_mut() {
            let before = messages.len();
            messages.retain(|m| m.expires_at > now);
            removed += before - messages.len();
        }
        Ok(removed)
    }
}
