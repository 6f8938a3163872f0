//! Keyed table backend contract used by the record store.

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::condition::Predicate;
use crate::core::StoreError;

/// Property bag as stored by a backend.
pub type Properties = Map<String, Value>;

/// Opaque concurrency token issued by the backend on every write.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ETag(pub String);

impl ETag {
    /// Fresh random token.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Record in its stored form.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEntity {
    /// Encoded partition key.
    pub partition_key: String,
    /// Encoded row key.
    pub row_key: String,
    /// Schema version the properties were written with.
    pub version: u32,
    /// Stored properties.
    pub properties: Properties,
}

/// Stored record together with its current ETag.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedEntity {
    /// Record contents.
    pub entity: RawEntity,
    /// Concurrency token.
    pub etag: ETag,
}

/// How `update_entity` applies the supplied properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Overwrite only the supplied properties.
    Merge,
    /// Replace the whole property set.
    Replace,
}

/// Opaque pagination cursor.
///
/// Encodes the key of the next record to return; callers must treat it as opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationToken(String);

impl ContinuationToken {
    /// Cursor positioned at the given key pair.
    pub fn from_keys(partition_key: &str, row_key: &str) -> Self {
        let raw = serde_json::to_vec(&(partition_key, row_key)).unwrap_or_default();
        Self(hex::encode(raw))
    }

    /// Recover the key pair.
    pub fn keys(&self) -> Result<(String, String), StoreError> {
        let raw = hex::decode(&self.0)
            .map_err(|e| StoreError::InvalidQuery(format!("bad continuation token: {e}")))?;
        serde_json::from_slice(&raw)
            .map_err(|e| StoreError::InvalidQuery(format!("bad continuation token: {e}")))
    }

    /// Wire form of the cursor.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rebuild a cursor from its wire form.
    pub fn from_string(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

/// A single backend query.
#[derive(Debug, Clone, PartialEq)]
pub struct TableQuery {
    /// Filter expression.
    pub filter: Predicate,
    /// Maximum records to return in this page.
    pub top: Option<usize>,
    /// Resume point from a previous page.
    pub continuation: Option<ContinuationToken>,
}

/// One page of query results.
#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    /// Matching records in key order.
    pub entries: Vec<TaggedEntity>,
    /// Cursor for the next page, if any remain.
    pub continuation: Option<ContinuationToken>,
}

/// Keyed store offering conditional writes and predicate queries.
///
/// Implementations must issue a new ETag on every successful write and reject
/// conditional writes whose `if_match` differs from the stored ETag with
/// [`StoreError::ConditionNotSatisfied`].
#[async_trait]
pub trait TableBackend: Send + Sync {
    /// Create a table; succeeds if it already exists.
    async fn create_table(&self, table: &str) -> Result<(), StoreError>;
    /// Drop a table and its records.
    async fn delete_table(&self, table: &str) -> Result<(), StoreError>;
    /// Fetch one record.
    async fn get_entity(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<Option<TaggedEntity>, StoreError>;
    /// Insert a new record; fails with `AlreadyExists` on collision.
    async fn insert_entity(&self, table: &str, entity: RawEntity) -> Result<ETag, StoreError>;
    /// Insert or fully replace a record.
    async fn upsert_entity(&self, table: &str, entity: RawEntity) -> Result<ETag, StoreError>;
    /// Update an existing record, optionally guarded by `if_match`.
    async fn update_entity(
        &self,
        table: &str,
        entity: RawEntity,
        mode: UpdateMode,
        if_match: Option<&ETag>,
    ) -> Result<ETag, StoreError>;
    /// Delete a record, optionally guarded by `if_match`.
    async fn delete_entity(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
        if_match: Option<&ETag>,
    ) -> Result<(), StoreError>;
    /// Run a filtered, paginated query.
    async fn query_entities(&self, table: &str, query: &TableQuery)
        -> Result<QueryPage, StoreError>;
}
