//! Deadline resolution and its interaction with claim expiry.

mod common;

use chrono::Duration;
use common::{Harness, PROVISIONER, WORKER_TYPE};
use prometheus_task_queue::config::ResolverConfig;
use prometheus_task_queue::core::delay_queue::{ClaimMessage, DeadlineMessage};
use prometheus_task_queue::core::task::{ReasonCreated, ReasonResolved};
use prometheus_task_queue::core::{
    ClaimResolver, DeadlineResolver, HandleOutcome, PollingResolver, Run, RunState, Task,
};

fn resolver(h: &Harness) -> DeadlineResolver {
    DeadlineResolver::new(
        h.tasks.clone(),
        h.queue.clone(),
        h.publisher.clone(),
        h.shared_clock(),
    )
}

#[tokio::test]
async fn deadline_on_task_without_runs_synthesizes_exception_run() {
    let h = Harness::new().await;
    let mut task = Task::new(h.definition("task-b", 3, Duration::hours(1)), h.now());
    task.runs.clear();
    let deadline = task.deadline;
    h.tasks.create(task, false).await.unwrap();
    h.queue.put_deadline_message("task-b", deadline).await.unwrap();

    let resolver = PollingResolver::new(resolver(&h), ResolverConfig::default());
    // Visible only after the deadline plus the configured grace delay.
    h.advance(Duration::hours(1) + Duration::minutes(5));
    assert_eq!(resolver.poll_once().await.unwrap().received, 0);
    h.advance(Duration::minutes(6));
    let report = resolver.poll_once().await.unwrap();
    assert_eq!(report.resolved, 1);

    let task = h.load("task-b").await;
    assert_eq!(task.runs.len(), 1);
    assert_eq!(task.runs[0].state, RunState::Exception);
    assert_eq!(task.runs[0].reason_created, ReasonCreated::Exception);
    assert_eq!(task.runs[0].reason_resolved, Some(ReasonResolved::DeadlineExceeded));
    assert!(task.is_unclaimed());

    assert_eq!(h.publisher.exception_events().len(), 1);
    assert!(h.publisher.pending_events().is_empty());
    assert_eq!(
        h.queue
            .count_pending_messages(PROVISIONER, WORKER_TYPE)
            .await
            .unwrap(),
        0
    );
    assert_eq!(h.broker.peek_bodies("resolved-queue").len(), 1);
}

#[tokio::test]
async fn deadline_resolves_running_run_and_neutralizes_claim() {
    let h = Harness::new().await;
    h.create_task("task-n", 2, Duration::minutes(30)).await;
    let taken_until = h.claim("task-n", 0, Duration::minutes(40)).await;
    let deadline = h.load("task-n").await.deadline;

    h.advance(Duration::minutes(31));
    let message = DeadlineMessage {
        task_id: "task-n".into(),
        deadline,
    };
    assert_eq!(resolver(&h).handle_message(&message).await.unwrap(), HandleOutcome::Resolved);

    let task = h.load("task-n").await;
    assert_eq!(task.runs[0].state, RunState::Exception);
    assert_eq!(task.runs[0].reason_resolved, Some(ReasonResolved::DeadlineExceeded));
    assert_eq!(task.retries_left, 2);
    task.check_invariants().unwrap();

    // The stale claim message no longer matches anything.
    h.advance(Duration::minutes(10));
    let claim = ClaimResolver::new(
        h.tasks.clone(),
        h.queue.clone(),
        h.publisher.clone(),
        h.shared_clock(),
    );
    let stale = ClaimMessage {
        task_id: "task-n".into(),
        run_id: 0,
        taken_until,
    };
    assert_eq!(claim.handle_message(&stale).await.unwrap(), HandleOutcome::Dropped);

    let exceptions = h.publisher.exception_events();
    assert_eq!(exceptions.len(), 1, "one exception event per run");
    assert_eq!(exceptions[0].run_id, 0);
}

#[tokio::test]
async fn resolved_task_is_not_touched_again() {
    let h = Harness::new().await;
    h.create_task("task-done", 0, Duration::minutes(30)).await;
    h.claim("task-done", 0, Duration::minutes(10)).await;
    let now = h.now();
    let mut task = h.load("task-done").await;
    task.modify(|task| {
        task.resolve_run(0, false, now);
    })
    .await
    .unwrap();
    let deadline = task.deadline;
    let etag = task.etag().clone();

    h.advance(Duration::minutes(45));
    let message = DeadlineMessage {
        task_id: "task-done".into(),
        deadline,
    };
    assert_eq!(resolver(&h).handle_message(&message).await.unwrap(), HandleOutcome::Dropped);
    let task = h.load("task-done").await;
    assert_eq!(task.runs[0].state, RunState::Failed);
    assert_eq!(task.etag(), &etag);
    assert!(h.publisher.events().is_empty());
}

#[tokio::test]
async fn every_unresolved_run_gets_one_event() {
    let h = Harness::new().await;
    h.create_task("task-m", 3, Duration::minutes(30)).await;
    let now = h.now();
    let mut task = h.load("task-m").await;
    task.modify(|task| {
        task.runs[0].resolve_exception(ReasonResolved::WorkerShutdown, now);
        task.runs.push(Run::pending(ReasonCreated::Retry, now));
    })
    .await
    .unwrap();
    let deadline = task.deadline;

    h.advance(Duration::minutes(45));
    let resolver = resolver(&h);
    let message = DeadlineMessage {
        task_id: "task-m".into(),
        deadline,
    };
    assert_eq!(resolver.handle_message(&message).await.unwrap(), HandleOutcome::Resolved);
    assert_eq!(resolver.handle_message(&message).await.unwrap(), HandleOutcome::Dropped);

    let task = h.load("task-m").await;
    assert_eq!(task.runs[0].reason_resolved, Some(ReasonResolved::WorkerShutdown));
    assert_eq!(task.runs[1].reason_resolved, Some(ReasonResolved::DeadlineExceeded));
    let run_ids: Vec<usize> = h
        .publisher
        .exception_events()
        .iter()
        .map(|e| e.run_id)
        .collect();
    assert_eq!(run_ids, vec![1]);
}

#[tokio::test]
async fn extended_deadline_ignores_old_message() {
    let h = Harness::new().await;
    h.create_task("task-e", 1, Duration::minutes(30)).await;
    let mut task = h.load("task-e").await;
    let old_deadline = task.deadline;
    task.modify(|task| task.deadline = old_deadline + Duration::hours(1))
        .await
        .unwrap();

    h.advance(Duration::minutes(45));
    let message = DeadlineMessage {
        task_id: "task-e".into(),
        deadline: old_deadline,
    };
    assert_eq!(resolver(&h).handle_message(&message).await.unwrap(), HandleOutcome::Dropped);
    assert_eq!(h.load("task-e").await.runs[0].state, RunState::Pending);
}

#[tokio::test]
async fn redelivery_after_publish_failure_announces_every_run_once() {
    let h = Harness::new().await;
    h.create_task("task-f", 1, Duration::minutes(30)).await;
    let deadline = h.load("task-f").await.deadline;
    h.queue.put_deadline_message("task-f", deadline).await.unwrap();
    h.advance(Duration::minutes(41));

    let resolver = PollingResolver::new(resolver(&h), ResolverConfig::default());
    h.publisher.set_failing(true);
    assert_eq!(resolver.poll_once().await.unwrap().failed, 1);
    let task = h.load("task-f").await;
    assert_eq!(task.runs[0].state, RunState::Exception);
    assert_eq!(task.pending_reports.len(), 1);
    assert!(h.broker.peek_bodies("resolved-queue").is_empty());

    h.publisher.set_failing(false);
    h.advance(Duration::minutes(11));
    let report = resolver.poll_once().await.unwrap();
    assert_eq!(report.resolved, 1);
    assert_eq!(h.publisher.exception_events().len(), 1);
    assert_eq!(h.broker.peek_bodies("resolved-queue").len(), 1);
    assert!(h.broker.peek_bodies("deadline-queue").is_empty());

    let task = h.load("task-f").await;
    assert!(task.pending_reports.is_empty());
    task.check_invariants().unwrap();
}

#[tokio::test]
async fn deadline_finishes_abandoned_claim_announcement() {
    let h = Harness::new().await;
    h.create_task("task-g", 0, Duration::minutes(30)).await;
    let deadline = h.load("task-g").await.deadline;
    h.queue.put_deadline_message("task-g", deadline).await.unwrap();
    let taken_until = h.claim("task-g", 0, Duration::minutes(20)).await;
    h.advance(Duration::minutes(21));

    let claims = ClaimResolver::new(
        h.tasks.clone(),
        h.queue.clone(),
        h.publisher.clone(),
        h.shared_clock(),
    );
    let message = ClaimMessage {
        task_id: "task-g".into(),
        run_id: 0,
        taken_until,
    };
    h.publisher.set_failing(true);
    assert!(claims.handle_message(&message).await.is_err());
    h.publisher.set_failing(false);

    h.advance(Duration::minutes(20));
    let report = PollingResolver::new(resolver(&h), ResolverConfig::default())
        .poll_once()
        .await
        .unwrap();
    assert_eq!(report.resolved, 1);

    let task = h.load("task-g").await;
    assert_eq!(task.runs.len(), 1);
    assert_eq!(task.runs[0].reason_resolved, Some(ReasonResolved::ClaimExpired));
    assert!(task.pending_reports.is_empty());
    assert_eq!(h.publisher.exception_events().len(), 1);
    assert_eq!(h.broker.peek_bodies("resolved-queue").len(), 1);

    // The claim message no longer matches anything.
    assert_eq!(claims.handle_message(&message).await.unwrap(), HandleOutcome::Dropped);
    assert_eq!(h.publisher.exception_events().len(), 1);
}
