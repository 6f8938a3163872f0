//! Tests for configuration validation

use std::collections::HashMap;

use prometheus_task_queue::config::{
    is_valid_account_name, is_valid_queue_name, ResolverConfig, ServiceConfig,
};
use rstest::rstest;

fn env() -> HashMap<&'static str, &'static str> {
    HashMap::from([
        ("TASK_QUEUE_PREFIX", "tq"),
        ("TASK_QUEUE_CLAIM_QUEUE", "claim-queue"),
        ("TASK_QUEUE_DEADLINE_QUEUE", "deadline-queue"),
        ("TASK_QUEUE_ACCOUNT_NAME", "devaccount"),
        ("TASK_QUEUE_ACCOUNT_KEY", "secret"),
    ])
}

fn from(vars: &HashMap<&'static str, &'static str>) -> Result<ServiceConfig, String> {
    ServiceConfig::from_lookup(|key| vars.get(key).map(|v| (*v).to_string()))
}

#[test]
fn test_config_from_lookup_defaults() {
    let cfg = from(&env()).unwrap();
    assert_eq!(cfg.task_table, "QueueTasks");
    assert_eq!(cfg.queue.resolved_queue, "resolved-queue");
    assert_eq!(cfg.queue.deadline_delay().as_secs(), 600);
    assert_eq!(cfg.queue.pending_poll_timeout().as_secs(), 300);
    assert_eq!(cfg.claim_resolver, ResolverConfig::default());
}

#[test]
fn test_config_from_lookup_overrides() {
    let mut vars = env();
    vars.insert("TASK_QUEUE_DEADLINE_DELAY_MS", "1000");
    vars.insert("TASK_QUEUE_CLAIM_RESOLVER_PARALLELISM", "4");
    vars.insert("TASK_QUEUE_DEPENDENCY_RESOLVER_POLLING_DELAY_MS", "250");
    let cfg = from(&vars).unwrap();
    assert_eq!(cfg.queue.deadline_delay_ms, 1000);
    assert_eq!(cfg.claim_resolver.parallelism, 4);
    assert_eq!(cfg.dependency_resolver.polling_delay().as_millis(), 250);
    assert_eq!(cfg.deadline_resolver.parallelism, 1);
}

#[test]
fn test_config_missing_variable() {
    let mut vars = env();
    vars.remove("TASK_QUEUE_ACCOUNT_KEY");
    let err = from(&vars).unwrap_err();
    assert!(err.contains("TASK_QUEUE_ACCOUNT_KEY"));
}

#[test]
fn test_config_bad_number() {
    let mut vars = env();
    vars.insert("TASK_QUEUE_CLAIM_RESOLVER_PARALLELISM", "many");
    assert!(from(&vars).unwrap_err().contains("not a number"));
}

#[rstest]
#[case::prefix_too_long("TASK_QUEUE_PREFIX", "toolong1")]
#[case::prefix_bad_start("TASK_QUEUE_PREFIX", "-tq")]
#[case::claim_queue_uppercase("TASK_QUEUE_CLAIM_QUEUE", "Claim")]
#[case::deadline_queue_short("TASK_QUEUE_DEADLINE_QUEUE", "dq")]
#[case::zero_parallelism("TASK_QUEUE_DEADLINE_RESOLVER_PARALLELISM", "0")]
#[case::zero_delay("TASK_QUEUE_CLAIM_RESOLVER_POLLING_DELAY_MS", "0")]
#[case::account_with_path("TASK_QUEUE_ACCOUNT_NAME", "dev/account")]
#[case::account_with_query("TASK_QUEUE_ACCOUNT_NAME", "dev?x=1")]
#[case::account_uppercase("TASK_QUEUE_ACCOUNT_NAME", "DevAccount")]
fn test_config_rejects_invalid_values(#[case] key: &'static str, #[case] value: &'static str) {
    let mut vars = env();
    vars.insert(key, value);
    assert!(from(&vars).is_err());
}

#[test]
fn test_config_from_json() {
    let cfg = ServiceConfig::from_json_str(
        r#"{
            "queue": {
                "prefix": "tq",
                "claim_queue": "claim-queue",
                "deadline_queue": "deadline-queue",
                "account_name": "devaccount",
                "account_key": "secret"
            },
            "claim_resolver": { "polling_delay_ms": 100, "parallelism": 2 }
        }"#,
    )
    .unwrap();
    assert_eq!(cfg.claim_resolver.parallelism, 2);
    assert_eq!(cfg.deadline_resolver, ResolverConfig::default());
    assert!(ServiceConfig::from_json_str("{}").is_err());
}

#[test]
fn test_queue_name_rules() {
    assert!(is_valid_queue_name("claim-queue"));
    assert!(is_valid_queue_name("q12"));
    assert!(!is_valid_queue_name("q"));
    assert!(!is_valid_queue_name("-queue"));
    assert!(!is_valid_queue_name("queue_name"));
    assert!(!is_valid_queue_name(&"q".repeat(64)));
}

#[test]
fn test_account_name_rules() {
    assert!(is_valid_account_name("devaccount"));
    assert!(is_valid_account_name("acct42"));
    assert!(!is_valid_account_name("ab"));
    assert!(!is_valid_account_name("dev-account"));
    assert!(!is_valid_account_name("evil.example.com"));
    assert!(!is_valid_account_name(&"a".repeat(25)));
}
