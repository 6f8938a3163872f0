//! Typed record store with optimistic-concurrency read-modify-write.

use std::future::Future;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::backend::{
    ContinuationToken, ETag, Properties, RawEntity, TableBackend, TableQuery, TaggedEntity,
    UpdateMode,
};
use super::condition::{Conditions, Field, Operator, Predicate};
use super::schema::{KeyBuilder, Schema};
use crate::core::StoreError;

/// Attempts `modify` makes before reporting congestion.
pub const MAX_MODIFY_ATTEMPTS: u32 = 10;

/// Page size used when a scan has no explicit limit.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Partition-key acceleration for scans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchPartition {
    /// Conditions must pin the partition key with equality.
    Exact,
    /// Evaluate partition key properties like any other property.
    #[default]
    None,
}

/// Row-key acceleration for scans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchRow {
    /// Conditions must pin the row key with equality.
    Exact,
    /// Evaluate row key properties like any other property.
    #[default]
    None,
}

/// Options for a single `scan`/`query` page.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Partition-key acceleration.
    pub match_partition: MatchPartition,
    /// Row-key acceleration.
    pub match_row: MatchRow,
    /// Maximum records in the page.
    pub limit: Option<usize>,
    /// Resume point from a previous page.
    pub continuation: Option<ContinuationToken>,
}

impl ScanOptions {
    /// Limit the page size.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Require an exact row-key match.
    #[must_use]
    pub const fn exact_row(mut self) -> Self {
        self.match_row = MatchRow::Exact;
        self
    }

    /// Resume from a cursor.
    #[must_use]
    pub fn resume(mut self, token: ContinuationToken) -> Self {
        self.continuation = Some(token);
        self
    }
}

/// Page of typed records.
pub struct ScanPage<T> {
    /// Records in key order.
    pub entries: Vec<Entity<T>>,
    /// Cursor for the next page, if any remain.
    pub continuation: Option<ContinuationToken>,
}

struct StoreInner {
    schema: Schema,
    backend: Arc<dyn TableBackend>,
}

/// Handle to one table, typed by its record struct.
///
/// `T` serializes to exactly the properties of the latest schema version.
pub struct RecordStore<T> {
    inner: Arc<StoreInner>,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for RecordStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _record: PhantomData,
        }
    }
}

impl<T> RecordStore<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    /// Bind a schema to a backend.
    pub fn new(schema: Schema, backend: Arc<dyn TableBackend>) -> Self {
        Self {
            inner: Arc::new(StoreInner { schema, backend }),
            _record: PhantomData,
        }
    }

    /// The schema descriptor.
    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    fn table(&self) -> &str {
        self.inner.schema.table_name()
    }

    fn backend(&self) -> &dyn TableBackend {
        self.inner.backend.as_ref()
    }

    /// Create the backing table if it does not exist.
    pub async fn ensure_table(&self) -> Result<(), StoreError> {
        self.backend().create_table(self.table()).await
    }

    /// Drop the backing table.
    pub async fn remove_table(&self) -> Result<(), StoreError> {
        self.backend().delete_table(self.table()).await
    }

    fn to_properties(&self, record: &T) -> Result<Properties, StoreError> {
        match serde_json::to_value(record)? {
            Value::Object(properties) => {
                self.inner.schema.validate(&properties)?;
                Ok(properties)
            }
            other => Err(StoreError::Schema(format!(
                "record must serialize to an object, got {other}"
            ))),
        }
    }

    fn hydrate(&self, tagged: TaggedEntity) -> Result<Entity<T>, StoreError> {
        let TaggedEntity { entity, etag } = tagged;
        let properties = if entity.version == self.inner.schema.latest_version() {
            entity.properties
        } else {
            self.inner.schema.migrate(entity.version, entity.properties)?
        };
        let record = serde_json::from_value(Value::Object(properties))?;
        Ok(Entity {
            store: self.clone(),
            partition_key: entity.partition_key,
            row_key: entity.row_key,
            version: entity.version,
            etag,
            record,
        })
    }

    /// Insert a record, or replace an existing one when `overwrite_if_exists`.
    pub async fn create(&self, record: T, overwrite_if_exists: bool) -> Result<Entity<T>, StoreError> {
        let properties = self.to_properties(&record)?;
        let (partition_key, row_key) = self.inner.schema.keys_for(&properties)?;
        let version = self.inner.schema.latest_version();
        let raw = RawEntity {
            partition_key: partition_key.clone(),
            row_key: row_key.clone(),
            version,
            properties,
        };
        let etag = if overwrite_if_exists {
            self.backend().upsert_entity(self.table(), raw).await?
        } else {
            self.backend().insert_entity(self.table(), raw).await?
        };
        Ok(Entity {
            store: self.clone(),
            partition_key,
            row_key,
            version,
            etag,
            record,
        })
    }

    fn keys_from(&self, key: &Value) -> Result<(String, String), StoreError> {
        let properties = key
            .as_object()
            .ok_or_else(|| StoreError::Schema("key properties must be an object".into()))?;
        self.inner.schema.keys_for(properties)
    }

    /// Fetch a record by its key properties.
    ///
    /// Returns `Ok(None)` for a missing record only when `ignore_if_not_exists`.
    pub async fn load(
        &self,
        key: &Value,
        ignore_if_not_exists: bool,
    ) -> Result<Option<Entity<T>>, StoreError> {
        let (partition_key, row_key) = self.keys_from(key)?;
        match self
            .backend()
            .get_entity(self.table(), &partition_key, &row_key)
            .await?
        {
            Some(tagged) => self.hydrate(tagged).map(Some),
            None if ignore_if_not_exists => Ok(None),
            None => Err(StoreError::NotFound(format!(
                "{}/{partition_key}/{row_key}",
                self.table()
            ))),
        }
    }

    /// Delete a record regardless of its ETag. Returns whether a record was removed.
    pub async fn remove(&self, key: &Value, ignore_if_not_exists: bool) -> Result<bool, StoreError> {
        let (partition_key, row_key) = self.keys_from(key)?;
        match self
            .backend()
            .delete_entity(self.table(), &partition_key, &row_key, None)
            .await
        {
            Ok(()) => Ok(true),
            Err(StoreError::NotFound(_)) if ignore_if_not_exists => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn key_predicate(
        &self,
        builder: &KeyBuilder,
        field: Field,
        conditions: &Conditions,
        covered: &mut Vec<String>,
    ) -> Result<Predicate, StoreError> {
        let mut values = serde_json::Map::new();
        for name in builder.properties() {
            let condition = conditions
                .iter()
                .find(|c| c.property == name && c.operator == Operator::Equal)
                .ok_or_else(|| {
                    StoreError::InvalidQuery(format!("exact key match needs `{name}` equality"))
                })?;
            let value = self.inner.schema.operand_value(name, &condition.operand)?;
            values.insert(name.to_owned(), value);
            covered.push(name.to_owned());
        }
        Ok(Predicate::Compare {
            field,
            operator: Operator::Equal,
            value: Value::String(builder.build(&values)?),
        })
    }

    /// Translate typed conditions into a backend predicate.
    pub fn build_predicate(
        &self,
        conditions: &Conditions,
        match_partition: MatchPartition,
        match_row: MatchRow,
    ) -> Result<Predicate, StoreError> {
        let schema = &self.inner.schema;
        let mut covered = Vec::new();
        let mut clauses = Vec::new();
        if match_partition == MatchPartition::Exact {
            clauses.push(self.key_predicate(
                schema.partition_key(),
                Field::PartitionKey,
                conditions,
                &mut covered,
            )?);
        }
        if match_row == MatchRow::Exact {
            clauses.push(self.key_predicate(schema.row_key(), Field::RowKey, conditions, &mut covered)?);
        }
        for condition in conditions.iter() {
            let value = schema.operand_value(&condition.property, &condition.operand)?;
            // Equality already enforced through the accelerated key.
            if condition.operator == Operator::Equal && covered.contains(&condition.property) {
                continue;
            }
            clauses.push(Predicate::Compare {
                field: Field::Property(condition.property.clone()),
                operator: condition.operator,
                value,
            });
        }
        Ok(Predicate::and(clauses))
    }

    /// Fetch one page of records matching `conditions`.
    pub async fn scan(&self, conditions: &Conditions, options: ScanOptions) -> Result<ScanPage<T>, StoreError> {
        let filter = self.build_predicate(conditions, options.match_partition, options.match_row)?;
        let query = TableQuery {
            filter,
            top: Some(options.limit.unwrap_or(DEFAULT_PAGE_SIZE)),
            continuation: options.continuation,
        };
        let page = self.backend().query_entities(self.table(), &query).await?;
        let entries = page
            .entries
            .into_iter()
            .map(|tagged| self.hydrate(tagged))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ScanPage {
            entries,
            continuation: page.continuation,
        })
    }

    /// `scan` restricted to a single partition.
    pub async fn query(&self, conditions: &Conditions, mut options: ScanOptions) -> Result<ScanPage<T>, StoreError> {
        options.match_partition = MatchPartition::Exact;
        self.scan(conditions, options).await
    }

    /// Push every matching record through `handler`, following continuations to the end.
    ///
    /// Returns the number of records handled; the first handler error aborts the scan.
    pub async fn scan_each<F, Fut, E>(
        &self,
        conditions: &Conditions,
        mut options: ScanOptions,
        mut handler: F,
    ) -> Result<usize, E>
    where
        F: FnMut(Entity<T>) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: From<StoreError>,
    {
        let mut handled = 0;
        loop {
            let page = self.scan(conditions, options.clone()).await?;
            for entity in page.entries {
                handler(entity).await?;
                handled += 1;
            }
            match page.continuation {
                Some(token) => options.continuation = Some(token),
                None => return Ok(handled),
            }
        }
    }

    /// `scan_each` restricted to a single partition.
    pub async fn query_each<F, Fut, E>(
        &self,
        conditions: &Conditions,
        mut options: ScanOptions,
        handler: F,
    ) -> Result<usize, E>
    where
        F: FnMut(Entity<T>) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: From<StoreError>,
    {
        options.match_partition = MatchPartition::Exact;
        self.scan_each(conditions, options, handler).await
    }
}

/// A loaded record plus the ETag it was read at.
pub struct Entity<T> {
    store: RecordStore<T>,
    partition_key: String,
    row_key: String,
    version: u32,
    etag: ETag,
    record: T,
}

impl<T: std::fmt::Debug> std::fmt::Debug for Entity<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("partition_key", &self.partition_key)
            .field("row_key", &self.row_key)
            .field("version", &self.version)
            .field("etag", &self.etag)
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

impl<T> Deref for Entity<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.record
    }
}

impl<T> Entity<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    /// ETag this handle last observed.
    pub const fn etag(&self) -> &ETag {
        &self.etag
    }

    /// Schema version the stored record was written with.
    pub const fn stored_version(&self) -> u32 {
        self.version
    }

    /// Encoded (partition, row) keys.
    pub fn keys(&self) -> (&str, &str) {
        (&self.partition_key, &self.row_key)
    }

    /// Owned copy of the record.
    pub fn into_inner(self) -> T {
        self.record
    }

    /// Refetch the record. Returns `true` when it changed since last read.
    pub async fn reload(&mut self) -> Result<bool, StoreError> {
        let store = self.store.clone();
        let tagged = store
            .backend()
            .get_entity(store.table(), &self.partition_key, &self.row_key)
            .await?
            .ok_or_else(|| {
                StoreError::NotFound(format!(
                    "{}/{}/{}",
                    store.table(),
                    self.partition_key,
                    self.row_key
                ))
            })?;
        let fresh = store.hydrate(tagged)?;
        let changed = fresh.etag != self.etag;
        self.version = fresh.version;
        self.etag = fresh.etag;
        self.record = fresh.record;
        Ok(changed)
    }

    /// Apply `modifier` under optimistic concurrency.
    ///
    /// The modifier may run several times (once per attempt) and must derive
    /// its changes from the record it is given. On return the handle holds the
    /// committed record.
    pub async fn modify<F>(&mut self, mut modifier: F) -> Result<(), StoreError>
    where
        F: FnMut(&mut T) + Send,
    {
        let store = self.store.clone();
        let schema = store.schema();
        let latest = schema.latest_version();

        for attempt in 1..=MAX_MODIFY_ATTEMPTS {
            let original = store.to_properties(&self.record)?;
            let mut shadow = self.record.clone();
            modifier(&mut shadow);
            let updated = store.to_properties(&shadow)?;

            if let Some(key) = schema
                .key_properties()
                .into_iter()
                .find(|key| original.get(*key) != updated.get(*key))
            {
                return Err(StoreError::KeyModified(key.to_owned()));
            }

            let changed: Properties = updated
                .iter()
                .filter(|(name, value)| original.get(*name) != Some(*value))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            if changed.is_empty() && self.version == latest {
                return Ok(());
            }

            let (mode, properties) = if self.version < latest {
                (UpdateMode::Replace, updated)
            } else {
                (UpdateMode::Merge, changed)
            };
            let raw = RawEntity {
                partition_key: self.partition_key.clone(),
                row_key: self.row_key.clone(),
                version: latest,
                properties,
            };
            match store
                .backend()
                .update_entity(store.table(), raw, mode, Some(&self.etag))
                .await
            {
                Ok(etag) => {
                    self.etag = etag;
                    self.version = latest;
                    self.record = shadow;
                    return Ok(());
                }
                Err(StoreError::ConditionNotSatisfied) => {
                    debug!(
                        table = store.table(),
                        partition_key = %self.partition_key,
                        attempt,
                        "modify lost the race, reloading"
                    );
                    self.reload().await?;
                }
                Err(err) => return Err(err),
            }
        }

        warn!(
            table = store.table(),
            partition_key = %self.partition_key,
            "[alert-operator] modify exhausted {MAX_MODIFY_ATTEMPTS} attempts"
        );
        Err(StoreError::Congestion {
            attempts: MAX_MODIFY_ATTEMPTS,
        })
    }

    /// Delete this record.
    ///
    /// Unless `ignore_changes`, the delete only succeeds if the record is
    /// unchanged since this handle last read it.
    pub async fn remove(&self, ignore_changes: bool, ignore_if_not_exists: bool) -> Result<bool, StoreError> {
        let if_match = (!ignore_changes).then_some(&self.etag);
        match self
            .store
            .backend()
            .delete_entity(self.store.table(), &self.partition_key, &self.row_key, if_match)
            .await
        {
            Ok(()) => Ok(true),
            Err(StoreError::NotFound(_)) if ignore_if_not_exists => Ok(false),
            Err(err) => Err(err),
        }
    }
}
