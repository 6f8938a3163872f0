//! Builds the task store, queue service and all resolvers from configuration.

use std::sync::Arc;

use anyhow::{anyhow, Context};

use crate::config::ServiceConfig;
use crate::core::record_store::TableBackend;
use crate::core::resolver::{
    ClaimResolver, DeadlineResolver, DependencyResolver, PollingResolver, ResolverStats, Spawn,
};
use crate::core::task::{task_schema, TaskStore};
use crate::core::{AppResult, DependencyTracker, Publisher, QueueBackend, QueueService};
use crate::util::clock::Clock;

/// External collaborators the resolvers run against.
#[derive(Clone)]
pub struct ResolverDeps {
    /// Task table backend.
    pub table: Arc<dyn TableBackend>,
    /// Message broker.
    pub broker: Arc<dyn QueueBackend>,
    /// Event publisher.
    pub publisher: Arc<dyn Publisher>,
    /// Dependency tracker.
    pub tracker: Arc<dyn DependencyTracker>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

/// Statistics of every resolver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverSetStats {
    /// Claim resolver.
    pub claim: ResolverStats,
    /// Deadline resolver.
    pub deadline: ResolverStats,
    /// Dependency resolver.
    pub dependency: ResolverStats,
}

/// Everything needed to run the resolution core.
pub struct ResolverSet {
    /// Task records.
    pub tasks: TaskStore,
    /// Delay queue.
    pub queue: Arc<QueueService>,
    /// Claim-expiry loops.
    pub claim: PollingResolver<ClaimResolver>,
    /// Deadline loops.
    pub deadline: PollingResolver<DeadlineResolver>,
    /// Dependency loops.
    pub dependency: PollingResolver<DependencyResolver>,
}

/// Build the resolver set from validated configuration.
pub fn build_resolvers(cfg: &ServiceConfig, deps: ResolverDeps) -> AppResult<ResolverSet> {
    cfg.validate().map_err(|e| anyhow!("config invalid: {e}"))?;

    let schema = task_schema(&cfg.task_table).context("task schema")?;
    let tasks = TaskStore::new(schema, deps.table);
    let queue = Arc::new(
        QueueService::new(cfg.queue.clone(), deps.broker, Arc::clone(&deps.clock))
            .context("queue service")?,
    );

    let claim = PollingResolver::new(
        ClaimResolver::new(
            tasks.clone(),
            Arc::clone(&queue),
            Arc::clone(&deps.publisher),
            Arc::clone(&deps.clock),
        ),
        cfg.claim_resolver,
    );
    let deadline = PollingResolver::new(
        DeadlineResolver::new(
            tasks.clone(),
            Arc::clone(&queue),
            deps.publisher,
            deps.clock,
        ),
        cfg.deadline_resolver,
    );
    let dependency = PollingResolver::new(
        DependencyResolver::new(Arc::clone(&queue), deps.tracker),
        cfg.dependency_resolver,
    );

    Ok(ResolverSet {
        tasks,
        queue,
        claim,
        deadline,
        dependency,
    })
}

impl ResolverSet {
    /// Create the task table and advisory queues.
    pub async fn ensure_resources(&self) -> AppResult<()> {
        self.tasks.ensure_table().await.context("task table")?;
        self.queue.ensure_claim_queue().await.context("claim queue")?;
        self.queue
            .ensure_deadline_queue()
            .await
            .context("deadline queue")?;
        self.queue
            .ensure_resolved_queue()
            .await
            .context("resolved queue")?;
        Ok(())
    }

    /// Start all three resolvers.
    pub fn start_all<S: Spawn>(&self, spawner: &S) {
        self.claim.start(spawner);
        self.deadline.start(spawner);
        self.dependency.start(spawner);
    }

    /// Stop all three resolvers and wait for their loops.
    pub async fn terminate_all(&self) {
        futures::join!(
            self.claim.terminate(),
            self.deadline.terminate(),
            self.dependency.terminate()
        );
    }

    /// Statistics of every resolver.
    pub fn stats(&self) -> ResolverSetStats {
        ResolverSetStats {
            claim: self.claim.stats(),
            deadline: self.deadline.stats(),
            dependency: self.dependency.stats(),
        }
    }
}
