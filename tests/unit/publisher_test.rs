//! Tests for the in-memory publisher

use chrono::{Duration, TimeZone, Utc};
use prometheus_task_queue::core::task::TaskPriority;
use prometheus_task_queue::core::{
    Publisher, Task, TaskDefinition, TaskExceptionEvent, TaskPendingEvent,
};
use prometheus_task_queue::infra::publisher::memory::PublishedEvent;
use prometheus_task_queue::infra::InMemoryPublisher;

fn task() -> Task {
    let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let mut task = Task::new(
        TaskDefinition {
            task_id: "task-1".to_string(),
            provisioner_id: "prov".to_string(),
            worker_type: "wt".to_string(),
            scheduler_id: "sched".to_string(),
            task_group_id: "group".to_string(),
            routes: vec!["r1".to_string()],
            priority: TaskPriority::Normal,
            retries: 0,
            created,
            deadline: created + Duration::hours(1),
            expires: created + Duration::days(7),
        },
        created,
    );
    task.claim_run(0, "g", "w", created + Duration::minutes(20), created);
    task
}

#[tokio::test]
async fn test_publisher_records_events_with_routes() {
    let publisher = InMemoryPublisher::default();
    let task = task();
    publisher
        .task_pending(TaskPendingEvent::for_run(&task, 0), &task.routes)
        .await
        .unwrap();
    publisher
        .task_exception(TaskExceptionEvent::for_run(&task, 0), &task.routes)
        .await
        .unwrap();

    let events = publisher.events();
    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], PublishedEvent::Pending { routes, .. } if routes == &task.routes));
    let exception = &publisher.exception_events()[0];
    assert_eq!(exception.worker_group.as_deref(), Some("g"));
    assert_eq!(exception.status.task_id, "task-1");
}

#[tokio::test]
async fn test_publisher_is_bounded() {
    let publisher = InMemoryPublisher::new(2);
    let task = task();
    for run_id in 0..3 {
        publisher
            .task_pending(TaskPendingEvent::for_run(&task, run_id), &[])
            .await
            .unwrap();
    }
    let run_ids: Vec<usize> = publisher.pending_events().iter().map(|e| e.run_id).collect();
    assert_eq!(run_ids, vec![1, 2]);
}

#[tokio::test]
async fn test_failing_publisher() {
    let publisher = InMemoryPublisher::default();
    publisher.set_failing(true);
    let err = publisher
        .task_exception(TaskExceptionEvent::for_run(&task(), 0), &[])
        .await
        .unwrap_err();
    assert_eq!(err.exchange, "task-exception");
    assert!(publisher.events().is_empty());
}
