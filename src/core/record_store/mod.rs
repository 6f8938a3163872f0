//! Optimistic-concurrency record store.
//!
//! Records are typed structs bound to a versioned [`Schema`]. Every write is
//! guarded by the backend's ETag; [`Entity::modify`] retries a
//! read-modify-write cycle until it commits or runs out of attempts.

pub mod backend;
pub mod condition;
pub mod instrument;
pub mod schema;
pub mod store;

pub use backend::{
    ContinuationToken, ETag, Properties, QueryPage, RawEntity, TableBackend, TableQuery,
    TaggedEntity, UpdateMode,
};
pub use condition::{Condition, Conditions, Field, Operand, Operator, Predicate};
pub use instrument::{InstrumentedTable, OperationStats, StoreCounters, StoreStats, TableOperation};
pub use schema::{KeyBuilder, Migration, PropertyType, Schema, SchemaBuilder, SchemaVersion};
pub use store::{
    Entity, MatchPartition, MatchRow, RecordStore, ScanOptions, ScanPage, DEFAULT_PAGE_SIZE,
    MAX_MODIFY_ATTEMPTS,
};
