//! Tests for task records and their transitions

use chrono::{Duration, TimeZone, Utc};
use prometheus_task_queue::core::task::{
    task_schema, ReasonCreated, ReasonResolved, TaskPriority, TaskState,
};
use prometheus_task_queue::core::{Run, RunState, Task, TaskDefinition};
use serde_json::json;

fn definition(retries: u32) -> TaskDefinition {
    let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    TaskDefinition {
        task_id: "task-1".to_string(),
        provisioner_id: "prov".to_string(),
        worker_type: "wt".to_string(),
        scheduler_id: "sched".to_string(),
        task_group_id: "group".to_string(),
        routes: vec!["r1".to_string()],
        priority: TaskPriority::High,
        retries,
        created,
        deadline: created + Duration::hours(1),
        expires: created + Duration::days(7),
    }
}

#[test]
fn test_new_task_has_one_pending_run() {
    let def = definition(5);
    let task = Task::new(def.clone(), def.created);
    assert_eq!(task.runs.len(), 1);
    assert_eq!(task.runs[0].reason_created, ReasonCreated::Scheduled);
    assert_eq!(task.state(), TaskState::Pending);
    assert_eq!(task.retries_left, 5);
    assert!(task.is_unclaimed());
    task.check_invariants().unwrap();
}

#[test]
fn test_claim_and_resolve() {
    let def = definition(1);
    let now = def.created;
    let mut task = Task::new(def, now);
    let until = now + Duration::minutes(20);

    assert!(!task.claim_run(1, "g", "w", until, now));
    assert!(task.claim_run(0, "g", "w", until, now));
    assert!(!task.claim_run(0, "g", "w", until, now));
    assert_eq!(task.taken_until, until);
    assert_eq!(task.state(), TaskState::Running);
    task.check_invariants().unwrap();

    assert!(task.resolve_run(0, true, now));
    assert!(!task.resolve_run(0, false, now));
    assert_eq!(task.runs[0].state, RunState::Completed);
    assert!(task.is_unclaimed());
}

#[test]
fn test_invariant_violations_are_reported() {
    let def = definition(1);
    let now = def.created;
    let mut task = Task::new(def, now);
    task.runs.push(Run::pending(ReasonCreated::Retry, now));
    assert!(task.check_invariants().is_err());

    task.runs[0].resolve_exception(ReasonResolved::ClaimExpired, now);
    task.check_invariants().unwrap();

    task.retries_left = 9;
    assert!(task.check_invariants().is_err());
}

#[test]
fn test_task_serializes_dates_as_millis() {
    let def = definition(0);
    let task = Task::new(def.clone(), def.created);
    let value = serde_json::to_value(&task).unwrap();
    assert_eq!(value["deadline"], json!(def.deadline.timestamp_millis()));
    assert_eq!(value["takenUntil"], json!(0));
    assert_eq!(value["priority"], json!("high"));
    assert_eq!(value["runs"][0]["state"], json!("pending"));
    assert!(value["runs"][0].get("reasonResolved").is_none());
}

#[test]
fn test_task_schema_validates_records() {
    let schema = task_schema("QueueTasks").unwrap();
    assert_eq!(schema.latest_version(), 3);
    assert!(schema.is_key_property("taskId"));

    let def = definition(0);
    let task = Task::new(def.clone(), def.created);
    let value = serde_json::to_value(&task).unwrap();
    let properties = value.as_object().unwrap();
    schema.validate(properties).unwrap();
    assert_eq!(
        schema.keys_for(properties).unwrap(),
        ("task-1".to_string(), "task".to_string())
    );
}

#[test]
fn test_status_lists_runs_with_ids() {
    let def = definition(0);
    let now = def.created;
    let mut task = Task::new(def, now);
    task.runs[0].resolve_exception(ReasonResolved::DeadlineExceeded, now);
    let status = task.status();
    assert_eq!(status.state, TaskState::Exception);
    assert_eq!(status.runs[0].run_id, 0);

    let value = serde_json::to_value(&status).unwrap();
    assert_eq!(value["runs"][0]["runId"], json!(0));
    assert_eq!(value["runs"][0]["reasonResolved"], json!("deadline-exceeded"));
}
