//! Tests for error types

use prometheus_task_queue::core::{PublishError, QueueError, ResolverError, StoreError};

#[test]
fn test_condition_not_satisfied_error() {
    let err = StoreError::ConditionNotSatisfied;
    assert_eq!(format!("{}", err), "update condition not satisfied");
}

#[test]
fn test_congestion_error() {
    let err = StoreError::Congestion { attempts: 10 };
    assert_eq!(format!("{}", err), "congestion: modify gave up after 10 attempts");
}

#[test]
fn test_key_modified_error() {
    let err = StoreError::KeyModified("taskId".to_string());
    assert_eq!(format!("{}", err), "key property `taskId` must not be modified");
}

#[test]
fn test_queue_not_found_error() {
    let err = QueueError::QueueNotFound("claim-queue".to_string());
    assert_eq!(format!("{}", err), "queue not found: claim-queue");
}

#[test]
fn test_resolver_error_is_transparent() {
    let err: ResolverError = StoreError::Backend("connection failed".to_string()).into();
    assert_eq!(format!("{}", err), "backend error: connection failed");

    let err: ResolverError = PublishError {
        exchange: "task-exception".to_string(),
        reason: "closed".to_string(),
    }
    .into();
    assert_eq!(format!("{}", err), "publish failed on `task-exception`: closed");
}

#[test]
fn test_dependency_error_keeps_source() {
    let err = ResolverError::Dependency(anyhow::anyhow!("graph unavailable"));
    assert_eq!(format!("{}", err), "dependency tracking failed: graph unavailable");
    assert!(std::error::Error::source(&err).is_some());
}

#[test]
fn test_serialization_error_conversion() {
    let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let err: QueueError = parse.into();
    assert!(matches!(err, QueueError::Serialization(_)));
}
