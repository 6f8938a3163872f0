//! Message payloads carried by the delay queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A run became pending; consumed by workers through the signed URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMessage {
    /// Task id.
    pub task_id: String,
    /// Run id.
    pub run_id: usize,
}

/// A claim may have expired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimMessage {
    /// Task id.
    pub task_id: String,
    /// Run id.
    pub run_id: usize,
    /// Claim expiry the message was scheduled for.
    pub taken_until: DateTime<Utc>,
}

/// A task deadline may have passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadlineMessage {
    /// Task id.
    pub task_id: String,
    /// Deadline the message was scheduled for.
    pub deadline: DateTime<Utc>,
}

/// How a task ended, as reported to dependency tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Task completed.
    Completed,
    /// Task failed.
    Failed,
    /// Task resolved as exception.
    Exception,
}

/// A task reached a final resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedMessage {
    /// Task id.
    pub task_id: String,
    /// Final resolution.
    pub resolution: Resolution,
}
