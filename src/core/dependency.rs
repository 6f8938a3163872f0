//! Dependency tracking seam.

use async_trait::async_trait;

use crate::core::delay_queue::Resolution;
use crate::core::AppResult;

/// Collaborator that unblocks dependents once a task is resolved.
///
/// The dependency graph itself is maintained elsewhere; the resolver only
/// forwards resolutions and retries on failure.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_task_queue::core::{AppResult, DependencyTracker, Resolution};
///
/// struct LoggingTracker;
///
/// #[async_trait]
/// impl DependencyTracker for LoggingTracker {
///     async fn resolve_task(&self, task_id: &str, resolution: Resolution) -> AppResult<()> {
///         tracing::info!(task_id, ?resolution, "task resolved");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait DependencyTracker: Send + Sync {
    /// Record that `task_id` reached `resolution`.
    ///
    /// Must be idempotent: the same notification can arrive more than once.
    async fn resolve_task(&self, task_id: &str, resolution: Resolution) -> AppResult<()>;
}
