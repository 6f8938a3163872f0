//! Error types for record store, queue and resolver operations.

use thiserror::Error;

/// Errors produced by the record store and its backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Record (or table) does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Insert collided with an existing record.
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// Conditional write rejected because the ETag moved on.
    #[error("update condition not satisfied")]
    ConditionNotSatisfied,
    /// Modify gave up after exhausting its attempt budget.
    #[error("congestion: modify gave up after {attempts} attempts")]
    Congestion {
        /// Attempts made before giving up.
        attempts: u32,
    },
    /// A modifier changed a key-defining property.
    #[error("key property `{0}` must not be modified")]
    KeyModified(String),
    /// Schema descriptor or record shape is invalid.
    #[error("schema error: {0}")]
    Schema(String),
    /// Scan conditions reference unknown or unfilterable properties.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    /// Properties failed to (de)serialize.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Errors produced by the delay queue and broker backends.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Named queue has not been created.
    #[error("queue not found: {0}")]
    QueueNotFound(String),
    /// Message (or its pop receipt) is no longer valid.
    #[error("message not found: {0}")]
    MessageNotFound(String),
    /// Provisioner, worker type or prefix is not a legal queue component.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
    /// Message payload failed to (de)serialize.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Failure to hand an event to the publisher.
#[derive(Debug, Error)]
#[error("publish failed on `{exchange}`: {reason}")]
pub struct PublishError {
    /// Exchange the event was destined for.
    pub exchange: String,
    /// Underlying reason.
    pub reason: String,
}

/// Errors surfaced while a resolver handles one advisory message.
#[derive(Debug, Error)]
pub enum ResolverError {
    /// Record store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Queue failure.
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// Publisher failure.
    #[error(transparent)]
    Publish(#[from] PublishError),
    /// Dependency tracker failure.
    #[error("dependency tracking failed: {0}")]
    Dependency(#[source] anyhow::Error),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
