//! Table backends.

pub mod memory;

pub use memory::InMemoryTable;
