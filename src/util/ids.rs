//! Identifier helpers for tasks and queue shards.

use uuid::Uuid;

/// Longest identifier accepted for a provisioner or worker type.
pub const MAX_IDENTIFIER_LENGTH: usize = 22;

/// Generate a fresh task identifier.
pub fn new_task_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Check that `value` matches `[A-Za-z0-9_-]{1,22}`.
pub fn is_valid_identifier(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_IDENTIFIER_LENGTH
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}
