//! # Prometheus Task Queue
//!
//! The resolution core of a distributed task queue: the part that makes task
//! state transitions correct when workers crash, claims expire and deadlines
//! pass, with many resolver processes running at once.
//!
//! ## Building Blocks
//!
//! - **Record store**: a typed entity store over an ETag-versioned table with
//!   optimistic-concurrency [`modify`](core::record_store::Entity::modify),
//!   schema versions and migrations, predicate scans and continuation tokens.
//! - **Task record**: the durable task with its run history and the
//!   transitions claim, resolve, retry and deadline-exceeded.
//! - **Delay queue**: advisory messages that become visible at a future time,
//!   one pending queue per provisioner/worker type and signed poll URLs.
//! - **Resolvers**: claim, deadline and dependency resolvers which poll their
//!   queues, re-validate against the task record and publish each state
//!   change exactly once.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_task_queue::builders::{build_resolvers, ResolverDeps};
//! use prometheus_task_queue::config::ServiceConfig;
//! use prometheus_task_queue::infra::{InMemoryBroker, InMemoryPublisher, InMemoryTable};
//! use prometheus_task_queue::runtime::TokioSpawner;
//! use prometheus_task_queue::util::clock::SystemClock;
//!
//! let config = ServiceConfig::from_env()?;
//! let resolvers = build_resolvers(&config, ResolverDeps {
//!     table: Arc::new(InMemoryTable::new()),
//!     broker: Arc::new(InMemoryBroker::default()),
//!     publisher: Arc::new(InMemoryPublisher::default()),
//!     tracker: Arc::new(my_tracker),
//!     clock: Arc::new(SystemClock),
//! })?;
//! resolvers.ensure_resources().await?;
//! resolvers.start_all(&TokioSpawner::new(tokio::runtime::Handle::current()));
//! // ...
//! resolvers.terminate_all().await;
//! ```
//!
//! For complete scenarios, see the integration tests under `tests/`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Record store, task records, delay queue and resolvers.
pub mod core;
/// Configuration models for queues, tables and resolver loops.
pub mod config;
/// Builders to construct the resolution core from configuration.
pub mod builders;
/// In-memory adapters for tables, queues and event publication.
pub mod infra;
/// Runtime adapters.
pub mod runtime;
/// Shared utilities.
pub mod util;
