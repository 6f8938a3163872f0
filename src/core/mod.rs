//! Resolution core: record store, task records, delay queue and resolvers.

pub mod delay_queue;
pub mod dependency;
pub mod error;
pub mod publisher;
pub mod record_store;
pub mod resolver;
pub mod task;

pub use delay_queue::{Delivery, QueueBackend, QueueService, Resolution};
pub use dependency::DependencyTracker;
pub use error::{AppResult, PublishError, QueueError, ResolverError, StoreError};
pub use publisher::{Publisher, TaskExceptionEvent, TaskPendingEvent};
pub use record_store::{Entity, RecordStore, TableBackend};
pub use resolver::{
    AdvisoryHandler, BatchReport, ClaimResolver, DeadlineResolver, DependencyResolver,
    HandleOutcome, PollingResolver, ResolverStats, Spawn,
};
pub use task::{PendingReport, Run, RunState, Task, TaskDefinition, TaskStore};
