//! Configuration models for the queue service and resolver loops.

pub mod service;

pub use service::{is_valid_account_name, is_valid_queue_name, QueueServiceConfig, ResolverConfig, ServiceConfig};
