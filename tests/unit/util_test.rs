//! Tests for utility functions

use chrono::{Duration, Utc};
use prometheus_task_queue::util::clock::{seconds_to, zero_time, Clock, ManualClock, SystemClock};
use prometheus_task_queue::util::ids::{is_valid_identifier, new_task_id, MAX_IDENTIFIER_LENGTH};

#[test]
fn test_manual_clock_shared_between_clones() {
    let clock = ManualClock::new(zero_time());
    let other = clock.clone();
    clock.advance(Duration::seconds(90));
    assert_eq!(other.now(), zero_time() + Duration::seconds(90));
    other.set(zero_time());
    assert_eq!(clock.now(), zero_time());
}

#[test]
fn test_system_clock_has_millisecond_precision() {
    let now = SystemClock.now();
    assert_eq!(now.timestamp_subsec_nanos() % 1_000_000, 0);
    assert!((Utc::now() - now).num_seconds() < 5);
}

#[test]
fn test_seconds_to() {
    let now = zero_time() + Duration::days(1);
    assert_eq!(seconds_to(now + Duration::seconds(30), now), 30);
    assert_eq!(seconds_to(now + Duration::milliseconds(1), now), 1);
    assert_eq!(seconds_to(now - Duration::seconds(30), now), 0);
}

#[test]
fn test_task_ids() {
    let a = new_task_id();
    let b = new_task_id();
    assert_ne!(a, b);
    assert!(a.len() <= 32);
    assert!(is_valid_identifier(&"x".repeat(MAX_IDENTIFIER_LENGTH)));
    assert!(!is_valid_identifier(&"x".repeat(MAX_IDENTIFIER_LENGTH + 1)));
}
