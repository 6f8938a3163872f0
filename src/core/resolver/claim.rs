//! Resolves runs whose claim expired without being renewed or resolved.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};

use super::report::{send_reports, settle_reports, REPORT_LEASE};
use super::{AdvisoryHandler, HandleOutcome};
use crate::core::delay_queue::{ClaimMessage, Delivery, QueueService};
use crate::core::publisher::Publisher;
use crate::core::record_store::{Conditions, ScanOptions};
use crate::core::task::{PendingReport, ReasonCreated, ReasonResolved, Run, RunState, TaskStore};
use crate::core::{QueueError, ResolverError};
use crate::util::clock::Clock;

/// Handler for the claim-expiry queue.
pub struct ClaimResolver {
    tasks: TaskStore,
    queue: Arc<QueueService>,
    publisher: Arc<dyn Publisher>,
    clock: Arc<dyn Clock>,
}

impl ClaimResolver {
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

    /// Expire the claim described by `message` if it still holds.
    ///
    /// A run this resolver already expired but never finished announcing is
    /// announced again once the earlier attempt's lease has run out.
    /// Does not acknowledge the message.
    pub async fn handle_message(&self, message: &ClaimMessage) -> Result<HandleOutcome, ResolverError> {
        let task_id = message.task_id.as_str();
        let run_id = message.run_id;
        let conditions = Conditions::new()
            .eq("taskId", task_id)
            .eq("takenUntil", message.taken_until);
        let page = self
            .tasks
            .query(&conditions, ScanOptions::default().exact_row().with_limit(1))
            .await?;
        let Some(mut task) = page.entries.into_iter().next() else {
            debug!(task_id, run_id, "claim already moved on or task is gone");
            return Ok(HandleOutcome::Dropped);
        };

        let still_claimed = |run: &Run| {
            run.state == RunState::Running && run.taken_until == Some(message.taken_until)
        };
        if !task.run(run_id).is_some_and(still_claimed) && task.pending_report(run_id).is_none() {
            debug!(task_id, run_id, "run no longer holds this claim");
            return Ok(HandleOutcome::Dropped);
        }

        let now = self.clock.now();
        let lease_until = now + REPORT_LEASE;
        let mut owned: Option<PendingReport> = None;
        task.modify(|task| {
            owned = None;
            if let Some(report) = task.pending_reports.iter_mut().find(|r| r.run_id == run_id) {
                if report.is_abandoned(now) {
                    report.lease_until = lease_until;
                    owned = Some(*report);
                }
                return;
            }
            // Past the deadline the deadline resolver takes over.
            if task.deadline <= now {
                return;
            }
            let is_last = task.last_run_id() == Some(run_id);
            let Some(run) = task.runs.get_mut(run_id) else {
                return;
            };
            if !still_claimed(run) {
                return;
            }
            run.resolve_exception(ReasonResolved::ClaimExpired, now);
            // takenUntil stays set until the expiry has been announced.
            let mut report = PendingReport::new(run_id, lease_until);
            if is_last && task.retries_left > 0 {
                task.retries_left -= 1;
                task.runs.push(Run::pending(ReasonCreated::Retry, now));
                report.retry_run_id = Some(run_id + 1);
            }
            task.pending_reports.push(report);
            owned = Some(report);
        })
        .await?;

        let Some(report) = owned else {
            debug!(task_id, run_id, "claim resolved elsewhere");
            return Ok(HandleOutcome::Dropped);
        };
        if report.retry_run_id.is_none() && task.last_run_id() != Some(run_id) {
            error!(task_id, run_id, "[alert-operator] expired run was not the last run");
        }

        send_reports(&self.queue, self.publisher.as_ref(), &task, &[report]).await?;
        settle_reports(&mut task, &[report], Some(message.taken_until)).await?;
        match report.retry_run_id {
            Some(retry_id) => info!(task_id, run_id, retry_id, "claim expired, retry scheduled"),
            None => info!(task_id, run_id, "claim expired, no retry"),
        }
        Ok(HandleOutcome::Resolved)
    }
}

#[async_trait]
impl AdvisoryHandler for ClaimResolver {
    type Message = ClaimMessage;

    fn name(&self) -> &'static str {
        "claim-resolver"
    }

    async fn poll(&self) -> Result<Vec<Delivery<ClaimMessage>>, QueueError> {
        self.queue.poll_claim_queue().await
    }

    async fn handle(&self, delivery: Delivery<ClaimMessage>) -> Result<HandleOutcome, ResolverError> {
        let outcome = self.handle_message(&delivery.payload).await?;
        delivery.remove().await?;
        Ok(outcome)
    }
}
