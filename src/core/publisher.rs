//! Event publication seam.
//!
//! Resolvers announce state changes through a [`Publisher`]; delivery to an
//! exchange or bus lives outside this crate.

use async_trait::async_trait;
use serde::Serialize;

use crate::core::task::{Task, TaskStatus};
use crate::core::PublishError;

/// Exchange name for pending events.
pub const TASK_PENDING_EXCHANGE: &str = "task-pending";

/// Exchange name for exception events.
pub const TASK_EXCEPTION_EXCHANGE: &str = "task-exception";

/// A run became pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPendingEvent {
    /// Task status after the change.
    pub status: TaskStatus,
    /// The pending run.
    pub run_id: usize,
}

/// A run was resolved as exception.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExceptionEvent {
    /// Task status after the change.
    pub status: TaskStatus,
    /// The resolved run.
    pub run_id: usize,
    /// Worker group that held the run, if it was claimed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_group: Option<String>,
    /// Worker that held the run, if it was claimed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
}

impl TaskPendingEvent {
    /// Event for `run_id` of `task`.
    pub fn for_run(task: &Task, run_id: usize) -> Self {
        Self {
            status: task.status(),
            run_id,
        }
    }
}

impl TaskExceptionEvent {
    /// Event for `run_id` of `task`, carrying the claiming worker if any.
    pub fn for_run(task: &Task, run_id: usize) -> Self {
        let run = task.run(run_id);
        Self {
            status: task.status(),
            run_id,
            worker_group: run.and_then(|r| r.worker_group.clone()),
            worker_id: run.and_then(|r| r.worker_id.clone()),
        }
    }
}

/// Fan-out of task events to routing keys.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish a "task pending" event.
    async fn task_pending(&self, event: TaskPendingEvent, routes: &[String]) -> Result<(), PublishError>;
    /// Publish a "task exception" event.
    async fn task_exception(&self, event: TaskExceptionEvent, routes: &[String]) -> Result<(), PublishError>;
}
