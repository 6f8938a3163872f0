//! Infrastructure adapters for tables, queues and publishers.

pub mod publisher;
pub mod queue;
pub mod table;

pub use publisher::InMemoryPublisher;
pub use queue::InMemoryBroker;
pub use table::InMemoryTable;
