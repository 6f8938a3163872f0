//! Delay queue: sharded pending queues plus the advisory timer queues.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::{debug, error};
use url::{Position, Url};

use super::backend::{AckHandle, Delivery, QueueBackend};
use super::messages::{
    ClaimMessage, DeadlineMessage, PendingMessage, Resolution, ResolvedMessage,
};
use super::signing::{SasToken, ShardSigner, SIGNATURE_START_SKEW, SIGNATURE_VALIDITY};
use crate::config::QueueServiceConfig;
use crate::core::task::Task;
use crate::core::QueueError;
use crate::util::clock::{seconds_to, Clock};
use crate::util::ids::is_valid_identifier;

/// TTL of claim, deadline and resolved messages.
pub const ADVISORY_MESSAGE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// How long a polled advisory message stays hidden before redelivery.
pub const ADVISORY_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Maximum messages per advisory poll.
pub const ADVISORY_BATCH_SIZE: usize = 32;

/// Signed, shard-scoped URLs a worker uses to poll its pending queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPollUrls {
    /// When the signature stops being accepted.
    pub expiry: DateTime<Utc>,
    /// GET URL receiving messages.
    pub signed_poll_url: String,
    /// DELETE URL template with `{{messageId}}` and `{{popReceipt}}` placeholders.
    pub signed_delete_url: String,
}

type QueueCell = Arc<OnceCell<String>>;

/// Front door to every queue the resolution core uses.
///
/// Physical queues are created on first use and remembered; a failed creation
/// is retried on the next call.
pub struct QueueService {
    config: QueueServiceConfig,
    backend: Arc<dyn QueueBackend>,
    clock: Arc<dyn Clock>,
    signer: ShardSigner,
    pending_queues: Mutex<HashMap<(String, String), QueueCell>>,
    claim_ready: OnceCell<()>,
    deadline_ready: OnceCell<()>,
    resolved_ready: OnceCell<()>,
}

impl QueueService {
    /// Build a service over `backend`.
    pub fn new(
        config: QueueServiceConfig,
        backend: Arc<dyn QueueBackend>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, QueueError> {
        config.validate().map_err(QueueError::InvalidIdentifier)?;
        let signer = ShardSigner::new(&config.account_name, &config.account_key)?;
        Ok(Self {
            config,
            backend,
            clock,
            signer,
            pending_queues: Mutex::new(HashMap::new()),
            claim_ready: OnceCell::new(),
            deadline_ready: OnceCell::new(),
            resolved_ready: OnceCell::new(),
        })
    }

    /// Active configuration.
    pub const fn config(&self) -> &QueueServiceConfig {
        &self.config
    }

    /// Name of the pending queue for a shard.
    pub fn pending_queue_name(&self, provisioner_id: &str, worker_type: &str) -> Result<String, QueueError> {
        for (what, id) in [("provisionerId", provisioner_id), ("workerType", worker_type)] {
            if !is_valid_identifier(id) {
                return Err(QueueError::InvalidIdentifier(format!(
                    "{what} `{id}` is not an identifier"
                )));
            }
        }
        let digest = Sha256::digest(format!("{provisioner_id}/{worker_type}").as_bytes());
        let shard = hex::encode(&digest[..20]);
        // Trailing component is the priority level; only one exists today.
        Ok(format!("{}-{shard}-1", self.config.prefix.to_ascii_lowercase()))
    }

    /// Create (once) the pending queue for a shard and return its name.
    pub async fn ensure_pending_queue(
        &self,
        provisioner_id: &str,
        worker_type: &str,
    ) -> Result<String, QueueError> {
        let name = self.pending_queue_name(provisioner_id, worker_type)?;
        let cell = Arc::clone(
            self.pending_queues
                .lock()
                .entry((provisioner_id.to_owned(), worker_type.to_owned()))
                .or_default(),
        );
        let created = cell
            .get_or_try_init(|| async {
                self.backend.create_queue(&name).await?;
                Ok::<_, QueueError>(name.clone())
            })
            .await?;
        Ok(created.clone())
    }

    async fn ensure(&self, cell: &OnceCell<()>, queue: &str) -> Result<(), QueueError> {
        cell.get_or_try_init(|| self.backend.create_queue(queue))
            .await
            .map(|_| ())
    }

    /// Create (once) the claim-expiry queue.
    pub async fn ensure_claim_queue(&self) -> Result<(), QueueError> {
        self.ensure(&self.claim_ready, &self.config.claim_queue).await
    }

    /// Create (once) the deadline-expiry queue.
    pub async fn ensure_deadline_queue(&self) -> Result<(), QueueError> {
        self.ensure(&self.deadline_ready, &self.config.deadline_queue)
            .await
    }

    /// Create (once) the resolved-notification queue.
    pub async fn ensure_resolved_queue(&self) -> Result<(), QueueError> {
        self.ensure(&self.resolved_ready, &self.config.resolved_queue)
            .await
    }

    async fn put<M: Serialize + Sync>(
        &self,
        queue: &str,
        message: &M,
        visibility: Duration,
        ttl: Duration,
    ) -> Result<(), QueueError> {
        let body = serde_json::to_string(message)?;
        self.backend.put_message(queue, body, visibility, ttl).await
    }

    async fn poll<M: DeserializeOwned>(&self, queue: &str) -> Result<Vec<Delivery<M>>, QueueError> {
        let received = self
            .backend
            .get_messages(queue, ADVISORY_BATCH_SIZE, ADVISORY_VISIBILITY_TIMEOUT)
            .await?;
        let mut deliveries = Vec::with_capacity(received.len());
        for message in received {
            match serde_json::from_str::<M>(&message.body) {
                Ok(payload) => {
                    let ack = AckHandle::new(Arc::clone(&self.backend), queue, &message);
                    deliveries.push(Delivery::new(
                        payload,
                        message.message_id,
                        message.dequeue_count,
                        ack,
                    ));
                }
                Err(err) => error!(
                    queue,
                    message_id = %message.message_id,
                    error = %err,
                    "[alert-operator] undecodable message left for expiry"
                ),
            }
        }
        Ok(deliveries)
    }

    /// Announce a pending run to workers of the task's shard.
    ///
    /// Does nothing once the task deadline has passed; deadline handling
    /// resolves such runs instead.
    pub async fn put_pending_message(&self, task: &Task, run_id: usize) -> Result<(), QueueError> {
        let time_to_deadline = seconds_to(task.deadline, self.clock.now());
        if time_to_deadline == 0 {
            debug!(
                task_id = %task.task_id,
                run_id,
                "[not-a-bug] run became pending after deadline, skipping pending message"
            );
            return Ok(());
        }
        let queue = self
            .ensure_pending_queue(&task.provisioner_id, &task.worker_type)
            .await?;
        let message = PendingMessage {
            task_id: task.task_id.clone(),
            run_id,
        };
        self.put(
            &queue,
            &message,
            Duration::ZERO,
            Duration::from_secs(time_to_deadline),
        )
        .await
    }

    /// Schedule a claim-expiry check at `taken_until`.
    pub async fn put_claim_message(
        &self,
        task_id: &str,
        run_id: usize,
        taken_until: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        self.ensure_claim_queue().await?;
        let message = ClaimMessage {
            task_id: task_id.to_owned(),
            run_id,
            taken_until,
        };
        let visibility = Duration::from_secs(seconds_to(taken_until, self.clock.now()));
        self.put(&self.config.claim_queue, &message, visibility, ADVISORY_MESSAGE_TTL)
            .await
    }

    /// Schedule a deadline check shortly after `deadline`.
    pub async fn put_deadline_message(&self, task_id: &str, deadline: DateTime<Utc>) -> Result<(), QueueError> {
        self.ensure_deadline_queue().await?;
        let message = DeadlineMessage {
            task_id: task_id.to_owned(),
            deadline,
        };
        let visibility = Duration::from_secs(seconds_to(deadline, self.clock.now()))
            + self.config.deadline_delay();
        self.put(&self.config.deadline_queue, &message, visibility, ADVISORY_MESSAGE_TTL)
            .await
    }

    /// Notify dependency tracking that a task reached `resolution`.
    pub async fn put_resolved_message(&self, task_id: &str, resolution: Resolution) -> Result<(), QueueError> {
        self.ensure_resolved_queue().await?;
        let message = ResolvedMessage {
            task_id: task_id.to_owned(),
            resolution,
        };
        self.put(
            &self.config.resolved_queue,
            &message,
            Duration::ZERO,
            ADVISORY_MESSAGE_TTL,
        )
        .await
    }

    /// Receive due claim-expiry messages.
    pub async fn poll_claim_queue(&self) -> Result<Vec<Delivery<ClaimMessage>>, QueueError> {
        self.ensure_claim_queue().await?;
        self.poll(&self.config.claim_queue).await
    }

    /// Receive due deadline messages.
    pub async fn poll_deadline_queue(&self) -> Result<Vec<Delivery<DeadlineMessage>>, QueueError> {
        self.ensure_deadline_queue().await?;
        self.poll(&self.config.deadline_queue).await
    }

    /// Receive resolved notifications.
    pub async fn poll_resolved_queue(&self) -> Result<Vec<Delivery<ResolvedMessage>>, QueueError> {
        self.ensure_resolved_queue().await?;
        self.poll(&self.config.resolved_queue).await
    }

    /// Receive pending messages for a shard the way a worker would.
    pub async fn poll_pending_queue(
        &self,
        provisioner_id: &str,
        worker_type: &str,
    ) -> Result<Vec<Delivery<PendingMessage>>, QueueError> {
        let queue = self.ensure_pending_queue(provisioner_id, worker_type).await?;
        let received = self
            .backend
            .get_messages(&queue, ADVISORY_BATCH_SIZE, self.config.pending_poll_timeout())
            .await?;
        received
            .into_iter()
            .map(|message| {
                let payload = serde_json::from_str(&message.body)?;
                let ack = AckHandle::new(Arc::clone(&self.backend), &queue, &message);
                Ok(Delivery::new(payload, message.message_id, message.dequeue_count, ack))
            })
            .collect()
    }

    /// Base URL of a queue's messages.
    fn messages_url(&self, queue: &str) -> Result<Url, QueueError> {
        let host = format!("https://{}.queue.core.windows.net/", self.config.account_name);
        let mut url =
            Url::parse(&host).map_err(|e| QueueError::Backend(format!("invalid queue host: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| QueueError::Backend("queue host cannot carry a path".into()))?
            .pop_if_empty()
            .push(queue)
            .push("messages");
        Ok(url)
    }

    /// Issue time-bounded poll/delete URLs for one shard.
    pub async fn signed_pending_poll_url(
        &self,
        provisioner_id: &str,
        worker_type: &str,
    ) -> Result<SignedPollUrls, QueueError> {
        let queue = self.ensure_pending_queue(provisioner_id, worker_type).await?;
        let now = self.clock.now();
        let expiry = now + SIGNATURE_VALIDITY;
        let token = self.signer.sign(&queue, now - SIGNATURE_START_SKEW, expiry);
        let messages = self.messages_url(&queue)?;

        let mut poll = messages.clone();
        poll.query_pairs_mut().append_pair(
            "visibilitytimeout",
            &self.config.pending_poll_timeout().as_secs().to_string(),
        );
        token.append_to(&mut poll);

        // Placeholders are substituted by the worker and must stay unencoded.
        let mut delete = messages;
        token.append_to(&mut delete);
        let signed_delete_url = format!(
            "{}/{{{{messageId}}}}?popreceipt={{{{popReceipt}}}}&{}",
            &delete[..Position::AfterPath],
            delete.query().unwrap_or_default()
        );
        Ok(SignedPollUrls {
            expiry,
            signed_poll_url: poll.into(),
            signed_delete_url,
        })
    }

    /// Check a signed worker URL against a shard at the current time.
    ///
    /// The URL must address the shard's queue and carry a valid signature.
    pub fn verify_capability(
        &self,
        provisioner_id: &str,
        worker_type: &str,
        signed_url: &str,
    ) -> Result<bool, QueueError> {
        let queue = self.pending_queue_name(provisioner_id, worker_type)?;
        let Ok(url) = Url::parse(signed_url) else {
            return Ok(false);
        };
        let expected = self.messages_url(&queue)?;
        if url.host_str() != expected.host_str() || !url.path().starts_with(expected.path()) {
            return Ok(false);
        }
        Ok(SasToken::from_url(&url)
            .is_some_and(|token| self.signer.verify(&queue, &token, self.clock.now())))
    }

    /// Unexpired messages waiting in a shard's pending queue.
    pub async fn count_pending_messages(&self, provisioner_id: &str, worker_type: &str) -> Result<usize, QueueError> {
        let queue = self.ensure_pending_queue(provisioner_id, worker_type).await?;
        self.backend.message_count(&queue).await
    }

    /// Purge expired messages from every queue.
    pub async fn delete_expired_messages(&self) -> Result<usize, QueueError> {
        let removed = self.backend.delete_expired_messages().await?;
        debug!(removed, "expired messages purged");
        Ok(removed)
    }
}
