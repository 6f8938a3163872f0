//! Tests for builder modules

use std::sync::Arc;

use async_trait::async_trait;
use prometheus_task_queue::builders::{build_resolvers, ResolverDeps, ResolverSetStats};
use prometheus_task_queue::config::{QueueServiceConfig, ResolverConfig, ServiceConfig};
use prometheus_task_queue::core::{AdvisoryHandler, AppResult, DependencyTracker, Resolution};
use prometheus_task_queue::infra::{InMemoryBroker, InMemoryPublisher, InMemoryTable};
use prometheus_task_queue::util::clock::SystemClock;

struct NoopTracker;

#[async_trait]
impl DependencyTracker for NoopTracker {
    async fn resolve_task(&self, _task_id: &str, _resolution: Resolution) -> AppResult<()> {
        Ok(())
    }
}

fn config() -> ServiceConfig {
    ServiceConfig {
        task_table: "Tasks".to_string(),
        queue: QueueServiceConfig {
            prefix: "tq".to_string(),
            claim_queue: "claim-queue".to_string(),
            deadline_queue: "deadline-queue".to_string(),
            resolved_queue: "resolved-queue".to_string(),
            deadline_delay_ms: 1000,
            pending_poll_timeout_ms: 1000,
            account_name: "devaccount".to_string(),
            account_key: "secret".to_string(),
        },
        claim_resolver: ResolverConfig::default(),
        deadline_resolver: ResolverConfig::default(),
        dependency_resolver: ResolverConfig::default(),
    }
}

fn deps(broker: Arc<InMemoryBroker>, table: Arc<InMemoryTable>) -> ResolverDeps {
    ResolverDeps {
        table,
        broker,
        publisher: Arc::new(InMemoryPublisher::default()),
        tracker: Arc::new(NoopTracker),
        clock: Arc::new(SystemClock),
    }
}

#[tokio::test]
async fn test_build_resolvers_creates_resources() {
    let broker = Arc::new(InMemoryBroker::default());
    let table = Arc::new(InMemoryTable::new());
    let set = build_resolvers(&config(), deps(broker.clone(), table.clone())).unwrap();

    assert_eq!(set.tasks.schema().table_name(), "Tasks");
    assert_eq!(set.claim.handler().name(), "claim-resolver");
    assert_eq!(set.deadline.handler().name(), "deadline-resolver");
    assert_eq!(set.dependency.handler().name(), "dependency-resolver");
    assert_eq!(set.stats(), ResolverSetStats::default());

    set.ensure_resources().await.unwrap();
    assert_eq!(
        broker.queue_names(),
        vec!["claim-queue", "deadline-queue", "resolved-queue"]
    );
    assert!(table.is_empty("Tasks"));
}

#[test]
fn test_build_resolvers_rejects_bad_queue_config() {
    let mut cfg = config();
    cfg.queue.claim_queue = "Bad_Name".to_string();
    let err = build_resolvers(
        &cfg,
        deps(Arc::new(InMemoryBroker::default()), Arc::new(InMemoryTable::new())),
    )
    .err()
    .unwrap();
    assert!(err.to_string().contains("claim_queue"));
}
