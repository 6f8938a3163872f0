//! Publisher backends.

pub mod memory;

pub use memory::{InMemoryPublisher, PublishedEvent};
