//! Resolves every unresolved run of a task once its deadline has passed.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::report::{adopt_abandoned, send_reports, settle_reports, REPORT_LEASE};
use super::{AdvisoryHandler, HandleOutcome};
use crate::core::delay_queue::{DeadlineMessage, Delivery, QueueService};
use crate::core::publisher::Publisher;
use crate::core::record_store::{Conditions, ScanOptions};
use crate::core::task::{PendingReport, ReasonCreated, ReasonResolved, Run, TaskStore};
use crate::core::{QueueError, ResolverError};
use crate::util::clock::{zero_time, Clock};

/// Handler for the deadline-expiry queue.
pub struct DeadlineResolver {
    tasks: TaskStore,
    queue: Arc<QueueService>,
    publisher: Arc<dyn Publisher>,
    clock: Arc<dyn Clock>,
}

impl DeadlineResolver {
    /// Create a handler over the given collaborators.
    pub fn new(
        tasks: TaskStore,
        queue: Arc<QueueService>,
        publisher: Arc<dyn Publisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tasks,
            queue,
            publisher,
            clock,
        }
    }

    /// Resolve the task named by `message` as deadline-exceeded.
    ///
    /// Also finishes announcing resolutions left behind by an attempt that
    /// failed after writing them. Does not acknowledge the message.
    pub async fn handle_message(&self, message: &DeadlineMessage) -> Result<HandleOutcome, ResolverError> {
        let task_id = message.task_id.as_str();
        let conditions = Conditions::new()
            .eq("taskId", task_id)
            .eq("deadline", message.deadline);
        let page = self
            .tasks
            .query(&conditions, ScanOptions::default().exact_row().with_limit(1))
            .await?;
        let Some(mut task) = page.entries.into_iter().next() else {
            debug!(
                task_id,
                deadline = %message.deadline,
                "[not-a-bug] no task with this deadline, ignoring deadline message"
            );
            return Ok(HandleOutcome::Dropped);
        };

        let now = self.clock.now();
        let lease_until = now + REPORT_LEASE;
        let mut owned: Vec<PendingReport> = Vec::new();
        task.modify(|task| {
            owned.clear();
            adopt_abandoned(task, now, &mut owned);
            if task.runs.is_empty() {
                let mut run = Run::pending(ReasonCreated::Exception, now);
                run.resolve_exception(ReasonResolved::DeadlineExceeded, now);
                task.runs.push(run);
                let report = PendingReport::new(0, lease_until);
                task.pending_reports.push(report);
                owned.push(report);
            }
            for (run_id, run) in task.runs.iter_mut().enumerate() {
                if !run.state.is_resolved() {
                    run.resolve_exception(ReasonResolved::DeadlineExceeded, now);
                    let report = PendingReport::new(run_id, lease_until);
                    task.pending_reports.push(report);
                    owned.push(report);
                }
            }
            // Neutralizes any claim-expiry message still in flight.
            task.taken_until = zero_time();
        })
        .await?;

        if owned.is_empty() {
            debug!(task_id, "every run already resolved and announced");
            return Ok(HandleOutcome::Dropped);
        }
        send_reports(&self.queue, self.publisher.as_ref(), &task, &owned).await?;
        settle_reports(&mut task, &owned, None).await?;
        let runs: Vec<usize> = owned.iter().map(|report| report.run_id).collect();
        info!(task_id, ?runs, "deadline exceeded");
        Ok(HandleOutcome::Resolved)
    }
}

#[async_trait]
impl AdvisoryHandler for DeadlineResolver {
    type Message = DeadlineMessage;

    fn name(&self) -> &'static str {
        "deadline-resolver"
    }

    async fn poll(&self) -> Result<Vec<Delivery<DeadlineMessage>>, QueueError> {
        self.queue.poll_deadline_queue().await
    }

    async fn handle(&self, delivery: Delivery<DeadlineMessage>) -> Result<HandleOutcome, ResolverError> {
        let outcome = self.handle_message(&delivery.payload).await?;
        delivery.remove().await?;
        Ok(outcome)
    }
}
