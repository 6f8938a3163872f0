//! Queue service and resolver configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lowercase letters, digits and hyphens; 3 to 63 chars; alphanumeric start.
pub fn is_valid_queue_name(name: &str) -> bool {
    (3..=63).contains(&name.len())
        && name.starts_with(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Lowercase letters and digits; 3 to 24 chars. The name becomes a host label.
pub fn is_valid_account_name(name: &str) -> bool {
    (3..=24).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

const fn default_deadline_delay_ms() -> u64 {
    10 * 60 * 1000
}

const fn default_pending_poll_timeout_ms() -> u64 {
    5 * 60 * 1000
}

fn default_resolved_queue() -> String {
    "resolved-queue".into()
}

/// Delay queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueServiceConfig {
    /// Prefix for pending-task queues; alphanumeric start, at most 6 chars.
    pub prefix: String,
    /// Claim-expiry queue name.
    pub claim_queue: String,
    /// Deadline-expiry queue name.
    pub deadline_queue: String,
    /// Task-resolved notification queue name.
    #[serde(default = "default_resolved_queue")]
    pub resolved_queue: String,
    /// Extra delay before deadline messages become visible.
    #[serde(default = "default_deadline_delay_ms")]
    pub deadline_delay_ms: u64,
    /// Visibility timeout embedded in signed pending-poll URLs.
    #[serde(default = "default_pending_poll_timeout_ms")]
    pub pending_poll_timeout_ms: u64,
    /// Storage account name used in signed URLs.
    pub account_name: String,
    /// Key for signing shard capabilities.
    pub account_key: String,
}

impl QueueServiceConfig {
    /// Deadline grace delay.
    pub const fn deadline_delay(&self) -> Duration {
        Duration::from_millis(self.deadline_delay_ms)
    }

    /// Pending-poll visibility timeout.
    pub const fn pending_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.pending_poll_timeout_ms)
    }

    /// Validate names and prefix.
    pub fn validate(&self) -> Result<(), String> {
        let mut chars = self.prefix.chars();
        let starts_ok = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
        if !starts_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(format!("invalid prefix `{}`", self.prefix));
        }
        if self.prefix.len() > 6 {
            return Err(format!("prefix `{}` is longer than 6 characters", self.prefix));
        }
        for (field, name) in [
            ("claim_queue", &self.claim_queue),
            ("deadline_queue", &self.deadline_queue),
            ("resolved_queue", &self.resolved_queue),
        ] {
            if !is_valid_queue_name(name) {
                return Err(format!("{field} `{name}` is not a valid queue name"));
            }
        }
        if !is_valid_account_name(&self.account_name) {
            return Err(format!(
                "account_name `{}` must be 3-24 lowercase letters or digits",
                self.account_name
            ));
        }
        if self.account_key.is_empty() {
            return Err("account_key must not be empty".into());
        }
        Ok(())
    }
}

/// Polling loop settings for one resolver.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Sleep after an empty poll, in milliseconds.
    pub polling_delay_ms: u64,
    /// Number of concurrent polling loops.
    pub parallelism: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            polling_delay_ms: 5_000,
            parallelism: 1,
        }
    }
}

impl ResolverConfig {
    /// Sleep after an empty poll.
    pub const fn polling_delay(&self) -> Duration {
        Duration::from_millis(self.polling_delay_ms)
    }

    /// Validate loop settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.parallelism == 0 {
            return Err("parallelism must be greater than 0".into());
        }
        if self.polling_delay_ms == 0 {
            return Err("polling_delay_ms must be greater than 0".into());
        }
        Ok(())
    }
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Task table name.
    #[serde(default = "default_task_table")]
    pub task_table: String,
    /// Delay queue settings.
    pub queue: QueueServiceConfig,
    /// Claim resolver loops.
    #[serde(default)]
    pub claim_resolver: ResolverConfig,
    /// Deadline resolver loops.
    #[serde(default)]
    pub deadline_resolver: ResolverConfig,
    /// Dependency resolver loops.
    #[serde(default)]
    pub dependency_resolver: ResolverConfig,
}

fn default_task_table() -> String {
    crate::core::task::TASK_TABLE.into()
}

impl ServiceConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        if self.task_table.is_empty() {
            return Err("task_table must not be empty".into());
        }
        self.queue.validate().map_err(|e| format!("queue invalid: {e}"))?;
        for (name, resolver) in [
            ("claim_resolver", &self.claim_resolver),
            ("deadline_resolver", &self.deadline_resolver),
            ("dependency_resolver", &self.dependency_resolver),
        ] {
            resolver
                .validate()
                .map_err(|e| format!("{name} invalid: {e}"))?;
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from `TASK_QUEUE_*` environment variables.
    ///
    /// A `.env` file in the working directory is loaded first if present.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let required = |key: &str| lookup(key).ok_or_else(|| format!("{key} is not set"));
        let number = |key: &str, default: u64| -> Result<u64, String> {
            lookup(key).map_or(Ok(default), |v| {
                v.parse().map_err(|e| format!("{key} is not a number: {e}"))
            })
        };
        let resolver = |name: &str| -> Result<ResolverConfig, String> {
            let defaults = ResolverConfig::default();
            let parallelism = number(
                &format!("TASK_QUEUE_{name}_PARALLELISM"),
                defaults.parallelism as u64,
            )?;
            Ok(ResolverConfig {
                polling_delay_ms: number(
                    &format!("TASK_QUEUE_{name}_POLLING_DELAY_MS"),
                    defaults.polling_delay_ms,
                )?,
                parallelism: usize::try_from(parallelism).map_err(|e| e.to_string())?,
            })
        };
        let cfg = Self {
            task_table: lookup("TASK_QUEUE_TASK_TABLE").unwrap_or_else(default_task_table),
            queue: QueueServiceConfig {
                prefix: required("TASK_QUEUE_PREFIX")?,
                claim_queue: required("TASK_QUEUE_CLAIM_QUEUE")?,
                deadline_queue: required("TASK_QUEUE_DEADLINE_QUEUE")?,
                resolved_queue: lookup("TASK_QUEUE_RESOLVED_QUEUE")
                    .unwrap_or_else(default_resolved_queue),
                deadline_delay_ms: number("TASK_QUEUE_DEADLINE_DELAY_MS", default_deadline_delay_ms())?,
                pending_poll_timeout_ms: number(
                    "TASK_QUEUE_PENDING_POLL_TIMEOUT_MS",
                    default_pending_poll_timeout_ms(),
                )?,
                account_name: required("TASK_QUEUE_ACCOUNT_NAME")?,
                account_key: required("TASK_QUEUE_ACCOUNT_KEY")?,
            },
            claim_resolver: resolver("CLAIM_RESOLVER")?,
            deadline_resolver: resolver("DEADLINE_RESOLVER")?,
            dependency_resolver: resolver("DEPENDENCY_RESOLVER")?,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}
