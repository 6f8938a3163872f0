//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use prometheus_task_queue::config::QueueServiceConfig;
use prometheus_task_queue::core::record_store::Entity;
use prometheus_task_queue::core::task::{task_key, task_schema, TaskPriority};
use prometheus_task_queue::core::{QueueService, Task, TaskDefinition, TaskStore};
use prometheus_task_queue::infra::{InMemoryBroker, InMemoryPublisher, InMemoryTable};
use prometheus_task_queue::util::clock::{Clock, ManualClock};
use prometheus_task_queue::util::telemetry::init_tracing_with;

pub const PROVISIONER: &str = "test-provisioner";
pub const WORKER_TYPE: &str = "test-worker";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub fn queue_config() -> QueueServiceConfig {
    QueueServiceConfig {
        prefix: "tq".into(),
        claim_queue: "claim-queue".into(),
        deadline_queue: "deadline-queue".into(),
        resolved_queue: "resolved-queue".into(),
        deadline_delay_ms: 10 * 60 * 1000,
        pending_poll_timeout_ms: 5 * 60 * 1000,
        account_name: "devaccount".into(),
        account_key: "c2VjcmV0LWtleQ==".into(),
    }
}

/// In-memory world driven by one manual clock.
pub struct Harness {
    pub clock: ManualClock,
    pub table: Arc<InMemoryTable>,
    pub broker: Arc<InMemoryBroker>,
    pub publisher: Arc<InMemoryPublisher>,
    pub queue: Arc<QueueService>,
    pub tasks: TaskStore,
}

impl Harness {
    pub async fn new() -> Self {
        init_tracing_with("prometheus_task_queue=debug");
        let clock = ManualClock::new(start_time());
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let table = Arc::new(InMemoryTable::new());
        let broker = Arc::new(InMemoryBroker::new(Arc::clone(&shared)));
        let publisher = Arc::new(InMemoryPublisher::default());
        let queue = Arc::new(
            QueueService::new(queue_config(), broker.clone(), Arc::clone(&shared)).unwrap(),
        );
        let tasks = TaskStore::new(task_schema("QueueTasks").unwrap(), table.clone());
        tasks.ensure_table().await.unwrap();
        Self {
            clock,
            table,
            broker,
            publisher,
            queue,
            tasks,
        }
    }

    pub fn shared_clock(&self) -> Arc<dyn Clock> {
        Arc::new(self.clock.clone())
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn definition(&self, task_id: &str, retries: u32, deadline_in: Duration) -> TaskDefinition {
        let now = self.now();
        TaskDefinition {
            task_id: task_id.into(),
            provisioner_id: PROVISIONER.into(),
            worker_type: WORKER_TYPE.into(),
            scheduler_id: "test-scheduler".into(),
            task_group_id: "group-1".into(),
            routes: vec!["route.a".into()],
            priority: TaskPriority::Normal,
            retries,
            created: now,
            deadline: now + deadline_in,
            expires: now + Duration::days(30),
        }
    }

    /// Create a task with one pending run.
    pub async fn create_task(&self, task_id: &str, retries: u32, deadline_in: Duration) -> Entity<Task> {
        let task = Task::new(self.definition(task_id, retries, deadline_in), self.now());
        self.tasks.create(task, false).await.unwrap()
    }

    /// Claim the last run until `now + claim_for` and schedule its claim-expiry check.
    pub async fn claim(&self, task_id: &str, run_id: usize, claim_for: Duration) -> DateTime<Utc> {
        let now = self.now();
        let taken_until = now + claim_for;
        let mut task = self.load(task_id).await;
        task.modify(|task| {
            task.claim_run(run_id, "group-1", "worker-1", taken_until, now);
        })
        .await
        .unwrap();
        self.queue
            .put_claim_message(task_id, run_id, taken_until)
            .await
            .unwrap();
        taken_until
    }

    pub async fn load(&self, task_id: &str) -> Entity<Task> {
        self.tasks.load(&task_key(task_id), false).await.unwrap().unwrap()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }
}
