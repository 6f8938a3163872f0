//! Delayed-message queues used as a lazy distributed timer.
//!
//! A message put with a visibility delay cannot be received before the delay
//! elapses, so the claim and deadline queues surface each check no earlier
//! than the instant it concerns. Receivers must re-validate against the task
//! record because delivery is at-least-once.

pub mod backend;
pub mod messages;
pub mod service;
pub mod signing;

pub use backend::{AckHandle, Delivery, QueueBackend, ReceivedMessage};
pub use messages::{ClaimMessage, DeadlineMessage, PendingMessage, Resolution, ResolvedMessage};
pub use service::{
    QueueService, SignedPollUrls, ADVISORY_BATCH_SIZE, ADVISORY_MESSAGE_TTL,
    ADVISORY_VISIBILITY_TIMEOUT,
};
pub use signing::{SasToken, ShardSigner, SIGNATURE_START_SKEW, SIGNATURE_VALIDITY};
