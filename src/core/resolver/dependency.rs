//! Forwards task resolutions to dependency tracking.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{AdvisoryHandler, HandleOutcome};
use crate::core::delay_queue::{Delivery, QueueService, ResolvedMessage};
use crate::core::dependency::DependencyTracker;
use crate::core::{QueueError, ResolverError};

/// Handler for the resolved-notification queue.
pub struct DependencyResolver {
    queue: Arc<QueueService>,
    tracker: Arc<dyn DependencyTracker>,
}

impl DependencyResolver {
    /// Create a handler forwarding to `tracker`.
    pub fn new(queue: Arc<QueueService>, tracker: Arc<dyn DependencyTracker>) -> Self {
        Self { queue, tracker }
    }

    /// Forward one resolution. Does not acknowledge the message.
    pub async fn handle_message(&self, message: &ResolvedMessage) -> Result<HandleOutcome, ResolverError> {
        if let Err(err) = self
            .tracker
            .resolve_task(&message.task_id, message.resolution)
            .await
        {
            warn!(
                task_id = %message.task_id,
                error = %err,
                "dependency tracking failed, message will be redelivered"
            );
            return Err(ResolverError::Dependency(err));
        }
        debug!(task_id = %message.task_id, resolution = ?message.resolution, "dependencies notified");
        Ok(HandleOutcome::Resolved)
    }
}

#[async_trait]
impl AdvisoryHandler for DependencyResolver {
    type Message = ResolvedMessage;

    fn name(&self) -> &'static str {
        "dependency-resolver"
    }

    async fn poll(&self) -> Result<Vec<Delivery<ResolvedMessage>>, QueueError> {
        self.queue.poll_resolved_queue().await
    }

    async fn handle(&self, delivery: Delivery<ResolvedMessage>) -> Result<HandleOutcome, ResolverError> {
        let outcome = self.handle_message(&delivery.payload).await?;
        delivery.remove().await?;
        Ok(outcome)
    }
}
