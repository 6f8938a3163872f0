//! Instrumentation middleware for table backends.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use super::backend::{ETag, QueryPage, RawEntity, TableBackend, TableQuery, TaggedEntity, UpdateMode};
use crate::core::StoreError;

/// Backend operation being measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TableOperation {
    /// `create_table`
    CreateTable,
    /// `delete_table`
    DeleteTable,
    /// `get_entity`
    GetEntity,
    /// `insert_entity`
    InsertEntity,
    /// `upsert_entity`
    UpsertEntity,
    /// `update_entity`
    UpdateEntity,
    /// `delete_entity`
    DeleteEntity,
    /// `query_entities`
    QueryEntities,
}

impl TableOperation {
    const ALL: [Self; 8] = [
        Self::CreateTable,
        Self::DeleteTable,
        Self::GetEntity,
        Self::InsertEntity,
        Self::UpsertEntity,
        Self::UpdateEntity,
        Self::DeleteEntity,
        Self::QueryEntities,
    ];

    /// Stable name used in logs and snapshots.
    pub const fn name(self) -> &'static str {
        match self {
            Self::CreateTable => "create_table",
            Self::DeleteTable => "delete_table",
            Self::GetEntity => "get_entity",
            Self::InsertEntity => "insert_entity",
            Self::UpsertEntity => "upsert_entity",
            Self::UpdateEntity => "update_entity",
            Self::DeleteEntity => "delete_entity",
            Self::QueryEntities => "query_entities",
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

/// Snapshot of one operation's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationStats {
    /// Calls made.
    pub calls: u64,
    /// Calls that failed (excluding lost conditional writes).
    pub errors: u64,
    /// Conditional writes rejected because the ETag moved.
    pub conflicts: u64,
    /// Cumulative latency in microseconds.
    pub total_micros: u64,
}

/// Snapshot of every operation's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Counters keyed by operation.
    pub operations: BTreeMap<TableOperation, OperationStats>,
}

impl StoreStats {
    /// Counters for one operation.
    pub fn get(&self, operation: TableOperation) -> OperationStats {
        self.operations.get(&operation).copied().unwrap_or_default()
    }
}

#[derive(Default)]
struct OperationCounters {
    calls: AtomicU64,
    errors: AtomicU64,
    conflicts: AtomicU64,
    total_micros: AtomicU64,
}

/// Shared counters updated by [`InstrumentedTable`].
#[derive(Default)]
pub struct StoreCounters {
    operations: [OperationCounters; 8],
}

impl StoreCounters {
    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> StoreStats {
        let operations = TableOperation::ALL
            .iter()
            .map(|op| {
                let c = &self.operations[op.index()];
                (
                    *op,
                    OperationStats {
                        calls: c.calls.load(Ordering::Relaxed),
                        errors: c.errors.load(Ordering::Relaxed),
                        conflicts: c.conflicts.load(Ordering::Relaxed),
                        total_micros: c.total_micros.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();
        StoreStats { operations }
    }
}

/// Wraps a backend and records per-operation call, error and latency counters.
pub struct InstrumentedTable<B> {
    inner: B,
    counters: Arc<StoreCounters>,
}

impl<B: TableBackend> InstrumentedTable<B> {
    /// Wrap `inner` with fresh counters.
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            counters: Arc::new(StoreCounters::default()),
        }
    }

    /// Shared handle to the counters, usable after the backend is boxed.
    pub fn counters(&self) -> Arc<StoreCounters> {
        Arc::clone(&self.counters)
    }

    /// Current counter values.
    pub fn stats(&self) -> StoreStats {
        self.counters.snapshot()
    }

    async fn observe<R, Fut>(&self, operation: TableOperation, table: &str, fut: Fut) -> Result<R, StoreError>
    where
        Fut: Future<Output = Result<R, StoreError>> + Send,
    {
        let started = Instant::now();
        let result = fut.await;
        let micros = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        let counters = &self.counters.operations[operation.index()];
        counters.calls.fetch_add(1, Ordering::Relaxed);
        counters.total_micros.fetch_add(micros, Ordering::Relaxed);
        match &result {
            Err(StoreError::ConditionNotSatisfied) => {
                counters.conflicts.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                counters.errors.fetch_add(1, Ordering::Relaxed);
            }
            Ok(_) => {}
        }
        debug!(
            operation = operation.name(),
            table,
            micros,
            ok = result.is_ok(),
            "table operation"
        );
        result
    }
}

#[async_trait]
impl<B: TableBackend> TableBackend for InstrumentedTable<B> {
    async fn create_table(&self, table: &str) -> Result<(), StoreError> {
        self.observe(TableOperation::CreateTable, table, self.inner.create_table(table))
            .await
    }

    async fn delete_table(&self, table: &str) -> Result<(), StoreError> {
        self.observe(TableOperation::DeleteTable, table, self.inner.delete_table(table))
            .await
    }

    async fn get_entity(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<Option<TaggedEntity>, StoreError> {
        self.observe(
            TableOperation::GetEntity,
            table,
            self.inner.get_entity(table, partition_key, row_key),
        )
        .await
    }

    async fn insert_entity(&self, table: &str, entity: RawEntity) -> Result<ETag, StoreError> {
        self.observe(
            TableOperation::InsertEntity,
            table,
            self.inner.insert_entity(table, entity),
        )
        .await
    }

    async fn upsert_entity(&self, table: &str, entity: RawEntity) -> Result<ETag, StoreError> {
        self.observe(
            TableOperation::UpsertEntity,
            table,
            self.inner.upsert_entity(table, entity),
        )
        .await
    }

    async fn update_entity(
        &self,
        table: &str,
        entity: RawEntity,
        mode: UpdateMode,
        if_match: Option<&ETag>,
    ) -> Result<ETag, StoreError> {
        self.observe(
            TableOperation::UpdateEntity,
            table,
            self.inner.update_entity(table, entity, mode, if_match),
        )
        .await
    }

    async fn delete_entity(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
        if_match: Option<&ETag>,
    ) -> Result<(), StoreError> {
        self.observe(
            TableOperation::DeleteEntity,
            table,
            self.inner.delete_entity(table, partition_key, row_key, if_match),
        )
        .await
    }

    async fn query_entities(&self, table: &str, query: &TableQuery) -> Result<QueryPage, StoreError> {
        self.observe(
            TableOperation::QueryEntities,
            table,
            self.inner.query_entities(table, query),
        )
        .await
    }
}
