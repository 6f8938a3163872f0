//! Sending the events owed for resolutions recorded on a task.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::core::delay_queue::{QueueService, Resolution};
use crate::core::publisher::{Publisher, TaskExceptionEvent, TaskPendingEvent};
use crate::core::record_store::Entity;
use crate::core::task::{PendingReport, RunState, Task};
use crate::core::ResolverError;
use crate::util::clock::zero_time;

/// How long a resolver owns the reports it wrote.
///
/// Shorter than the advisory visibility timeout, so a redelivered message
/// always finds the lease of a failed attempt expired.
pub const REPORT_LEASE: Duration = Duration::minutes(5);

/// Send the events for `reports`.
///
/// A report with a retry announces the retry while it is still pending. Any
/// other report publishes an exception for its run, and if one of those runs
/// is the last run, dependency tracking is notified once.
pub(crate) async fn send_reports(
    queue: &QueueService,
    publisher: &dyn Publisher,
    task: &Task,
    reports: &[PendingReport],
) -> Result<(), ResolverError> {
    let last = task.last_run_id();
    let mut resolved = false;
    for report in reports {
        if let Some(retry_id) = report.retry_run_id {
            if task.run(retry_id).is_some_and(|run| run.state == RunState::Pending) {
                queue.put_pending_message(task, retry_id).await?;
                publisher
                    .task_pending(TaskPendingEvent::for_run(task, retry_id), &task.routes)
                    .await?;
            } else {
                debug!(
                    task_id = %task.task_id,
                    retry_id,
                    "[not-a-bug] retry moved on before it was announced"
                );
            }
            continue;
        }
        publisher
            .task_exception(TaskExceptionEvent::for_run(task, report.run_id), &task.routes)
            .await?;
        resolved |= Some(report.run_id) == last;
    }
    if resolved {
        queue
            .put_resolved_message(&task.task_id, Resolution::Exception)
            .await?;
    }
    Ok(())
}

/// Drop `sent` from the task once their events are out.
///
/// With `taken_until`, the task claim is also cleared if it still holds that
/// value, so the claim message no longer matches.
pub(crate) async fn settle_reports(
    task: &mut Entity<Task>,
    sent: &[PendingReport],
    taken_until: Option<DateTime<Utc>>,
) -> Result<(), ResolverError> {
    task.modify(|task| {
        task.settle_reports(sent);
        if let Some(taken_until) = taken_until {
            let running = task
                .runs
                .last()
                .is_some_and(|run| run.state == RunState::Running);
            if task.taken_until == taken_until && !running {
                task.taken_until = zero_time();
            }
        }
    })
    .await?;
    Ok(())
}

/// Take over every report whose lease ran out at `now`.
pub(crate) fn adopt_abandoned(task: &mut Task, now: DateTime<Utc>, owned: &mut Vec<PendingReport>) {
    let lease_until = now + REPORT_LEASE;
    for report in &mut task.pending_reports {
        if report.is_abandoned(now) {
            report.lease_until = lease_until;
            owned.push(*report);
        }
    }
}
