//! In-memory table backend.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::record_store::{
    ContinuationToken, ETag, Properties, QueryPage, RawEntity, TableBackend, TableQuery,
    TaggedEntity, UpdateMode,
};
use crate::core::StoreError;

type Key = (String, String);

#[derive(Debug, Clone)]
struct StoredRow {
    version: u32,
    properties: Properties,
    etag: ETag,
}

impl StoredRow {
    fn tagged(&self, (partition_key, row_key): &Key) -> TaggedEntity {
        TaggedEntity {
            entity: RawEntity {
                partition_key: partition_key.clone(),
                row_key: row_key.clone(),
                version: self.version,
                properties: self.properties.clone(),
            },
            etag: self.etag.clone(),
        }
    }
}

type Table = BTreeMap<Key, StoredRow>;

/// Table backend keeping records in ordered maps; ETags are random UUIDs.
///
/// Queries that pin the partition key only walk that partition.
#[derive(Default)]
pub struct InMemoryTable {
    tables: Mutex<HashMap<String, Table>>,
}

impl InMemoryTable {
    /// Empty backend with no tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in `table` (zero if it does not exist).
    pub fn len(&self, table: &str) -> usize {
        self.tables.lock().get(table).map_or(0, BTreeMap::len)
    }

    /// True when `table` holds no records.
    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }

    fn with_table<R>(
        &self,
        table: &str,
        f: impl FnOnce(&mut Table) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut tables = self.tables.lock();
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::NotFound(format!("table {table}")))?;
        f(rows)
    }
}

fn check_etag(row: &StoredRow, if_match: Option<&ETag>) -> Result<(), StoreError> {
    match if_match {
        Some(expected) if *expected != row.etag => Err(StoreError::ConditionNotSatisfied),
        _ => Ok(()),
    }
}

#[async_trait]
impl TableBackend for InMemoryTable {
    async fn create_table(&self, table: &str) -> Result<(), StoreError> {
        self.tables.lock().entry(table.to_owned()).or_default();
        Ok(())
    }

    async fn delete_table(&self, table: &str) -> Result<(), StoreError> {
        self.tables
            .lock()
            .remove(table)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("table {table}")))
    }

    async fn get_entity(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<Option<TaggedEntity>, StoreError> {
        self.with_table(table, |rows| {
            let key = (partition_key.to_owned(), row_key.to_owned());
            Ok(rows.get(&key).map(|row| row.tagged(&key)))
        })
    }

    async fn insert_entity(&self, table: &str, entity: RawEntity) -> Result<ETag, StoreError> {
        self.with_table(table, |rows| {
            let key = (entity.partition_key, entity.row_key);
            if rows.contains_key(&key) {
                return Err(StoreError::AlreadyExists(format!("{}/{}", key.0, key.1)));
            }
            let etag = ETag::generate();
            rows.insert(
                key,
                StoredRow {
                    version: entity.version,
                    properties: entity.properties,
                    etag: etag.clone(),
                },
            );
            Ok(etag)
        })
    }

    async fn upsert_entity(&self, table: &str, entity: RawEntity) -> Result<ETag, StoreError> {
        self.with_table(table, |rows| {
            let etag = ETag::generate();
            rows.insert(
                (entity.partition_key, entity.row_key),
                StoredRow {
                    version: entity.version,
                    properties: entity.properties,
                    etag: etag.clone(),
                },
            );
            Ok(etag)
        })
    }

    async fn update_entity(
        &self,
        table: &str,
        entity: RawEntity,
        mode: UpdateMode,
        if_match: Option<&ETag>,
    ) -> Result<ETag, StoreError> {
        self.with_table(table, |rows| {
            let key = (entity.partition_key, entity.row_key);
            let row = rows
                .get_mut(&key)
                .ok_or_else(|| StoreError::NotFound(format!("{}/{}", key.0, key.1)))?;
            check_etag(row, if_match)?;
            match mode {
                UpdateMode::Merge => row.properties.extend(entity.properties),
                UpdateMode::Replace => row.properties = entity.properties,
            }
            row.version = entity.version;
            row.etag = ETag::generate();
            Ok(row.etag.clone())
        })
    }

    async fn delete_entity(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
        if_match: Option<&ETag>,
    ) -> Result<(), StoreError> {
        self.with_table(table, |rows| {
            let key = (partition_key.to_owned(), row_key.to_owned());
            let row = rows
                .get(&key)
                .ok_or_else(|| StoreError::NotFound(format!("{partition_key}/{row_key}")))?;
            check_etag(row, if_match)?;
            rows.remove(&key);
            Ok(())
        })
    }

    async fn query_entities(&self, table: &str, query: &TableQuery) -> Result<QueryPage, StoreError> {
        let start = query
            .continuation
            .as_ref()
            .map(ContinuationToken::keys)
            .transpose()?;
        let top = query.top.unwrap_or(usize::MAX).max(1);
        self.with_table(table, |rows| {
            let lower = match (&start, query.filter.exact_partition()) {
                (Some(key), _) => Bound::Included(key.clone()),
                (None, Some(partition)) => Bound::Included((partition.to_owned(), String::new())),
                (None, None) => Bound::Unbounded,
            };
            let partition = query.filter.exact_partition();
            let mut page = QueryPage::default();
            for (key, row) in rows.range((lower, Bound::Unbounded)) {
                if partition.is_some_and(|p| p != key.0) {
                    break;
                }
                if !query.filter.matches(&key.0, &key.1, &row.properties) {
                    continue;
                }
                if page.entries.len() == top {
                    page.continuation = Some(ContinuationToken::from_keys(&key.0, &key.1));
                    break;
                }
                page.entries.push(row.tagged(key));
            }
            Ok(page)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record_store::{Field, Operator, Predicate};
    use serde_json::json;

    fn raw(pk: &str, n: i64) -> RawEntity {
        RawEntity {
            partition_key: pk.into(),
            row_key: "r".into(),
            version: 1,
            properties: json!({ "n": n }).as_object().cloned().unwrap(),
        }
    }

    #[tokio::test]
    async fn conditional_update_rejects_stale_etag() {
        let table = InMemoryTable::new();
        table.create_table("t").await.unwrap();
        let first = table.insert_entity("t", raw("a", 1)).await.unwrap();
        let second = table
            .update_entity("t", raw("a", 2), UpdateMode::Merge, Some(&first))
            .await
            .unwrap();
        assert_ne!(first, second);
        let stale = table
            .update_entity("t", raw("a", 3), UpdateMode::Merge, Some(&first))
            .await;
        assert!(matches!(stale, Err(StoreError::ConditionNotSatisfied)));
        let insert_again = table.insert_entity("t", raw("a", 9)).await;
        assert!(matches!(insert_again, Err(StoreError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn query_pages_through_matches() {
        let table = InMemoryTable::new();
        table.create_table("t").await.unwrap();
        for (i, pk) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            table.insert_entity("t", raw(pk, i as i64)).await.unwrap();
        }
        let filter = Predicate::Compare {
            field: Field::Property("n".into()),
            operator: Operator::GreaterThanOrEqual,
            value: json!(1),
        };
        let mut query = TableQuery {
            filter,
            top: Some(3),
            continuation: None,
        };
        let first = table.query_entities("t", &query).await.unwrap();
        assert_eq!(first.entries.len(), 3);
        query.continuation = first.continuation;
        let second = table.query_entities("t", &query).await.unwrap();
        assert_eq!(second.entries.len(), 1);
        assert_eq!(second.entries[0].entity.partition_key, "e");
        assert!(second.continuation.is_none());
    }

    #[tokio::test]
    async fn missing_table_is_not_found() {
        let table = InMemoryTable::new();
        let result = table.get_entity("nope", "a", "b").await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }
}
