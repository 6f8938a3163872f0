//! Task records and their run history.
//!
//! A [`Task`] is stored through the record store under [`task_schema`]. Runs
//! are append-only; only the last run is ever edited in place, and only while
//! it is pending or running.
//!
//! A resolver that resolves a run records a [`PendingReport`] in the same
//! write. The entry is removed once the events announcing the resolution have
//! gone out, so a resolver that fails midway leaves enough behind for the
//! redelivered message to finish the job.

use chrono::serde::ts_milliseconds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::record_store::{KeyBuilder, PropertyType, RecordStore, Schema};
use crate::core::StoreError;
use crate::util::clock::zero_time;

/// Default backing table for tasks.
pub const TASK_TABLE: &str = "QueueTasks";

/// Store handle for task records.
pub type TaskStore = RecordStore<Task>;

/// State of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// Waiting for a worker to claim it.
    Pending,
    /// Claimed by a worker.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully.
    Failed,
    /// Resolved by the queue (expiry, cancellation, ...).
    Exception,
}

impl RunState {
    /// Completed, failed or exception.
    pub const fn is_resolved(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Exception)
    }
}

/// Why a run was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasonCreated {
    /// First run of a scheduled task.
    Scheduled,
    /// Automatic retry after an intermittent exception.
    Retry,
    /// Retry requested by the task itself.
    TaskRetry,
    /// Rerun requested through the API.
    Rerun,
    /// Synthesized while resolving an exception.
    Exception,
}

/// Why a run was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasonResolved {
    /// Worker reported success.
    Completed,
    /// Worker reported failure.
    Failed,
    /// Task deadline passed.
    DeadlineExceeded,
    /// Task was canceled.
    Canceled,
    /// Worker stopped renewing its claim.
    ClaimExpired,
    /// Worker shut down mid-run.
    WorkerShutdown,
    /// Payload rejected by the worker.
    MalformedPayload,
    /// Worker lacked a resource.
    ResourceUnavailable,
    /// Queue or worker internal error.
    InternalError,
    /// Task reported an intermittent failure.
    IntermittentTask,
}

/// Scheduling priority of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskPriority {
    /// Highest.
    Highest,
    /// Very high.
    VeryHigh,
    /// High.
    High,
    /// Medium.
    Medium,
    /// Low.
    Low,
    /// Very low.
    VeryLow,
    /// Lowest.
    Lowest,
    /// Default for tasks written before priorities existed.
    #[default]
    Normal,
}

/// One attempt at executing a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    /// Current state.
    pub state: RunState,
    /// Why the run exists.
    pub reason_created: ReasonCreated,
    /// Why the run was resolved, once it is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_resolved: Option<ReasonResolved>,
    /// Claiming worker group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_group: Option<String>,
    /// Claiming worker id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    /// Claim expiry while running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taken_until: Option<DateTime<Utc>>,
    /// When the run became pending.
    pub scheduled: DateTime<Utc>,
    /// When the run was claimed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
    /// When the run was resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<DateTime<Utc>>,
}

impl Run {
    /// Fresh pending run.
    pub const fn pending(reason_created: ReasonCreated, scheduled: DateTime<Utc>) -> Self {
        Self {
            state: RunState::Pending,
            reason_created,
            reason_resolved: None,
            worker_group: None,
            worker_id: None,
            taken_until: None,
            scheduled,
            started: None,
            resolved: None,
        }
    }

    /// Mark as exception with `reason`.
    pub fn resolve_exception(&mut self, reason: ReasonResolved, now: DateTime<Utc>) {
        self.state = RunState::Exception;
        self.reason_resolved = Some(reason);
        self.resolved = Some(now);
    }
}

/// Resolution whose events have not all been sent yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingReport {
    /// The resolved run.
    pub run_id: usize,
    /// Retry run created together with the resolution, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_run_id: Option<usize>,
    /// Until when the resolver that wrote the entry is sending the events.
    #[serde(with = "ts_milliseconds")]
    pub lease_until: DateTime<Utc>,
}

impl PendingReport {
    /// Entry for `run_id`, leased until `lease_until`.
    pub const fn new(run_id: usize, lease_until: DateTime<Utc>) -> Self {
        Self {
            run_id,
            retry_run_id: None,
            lease_until,
        }
    }

    /// Whether the lease ran out at `now`.
    pub fn is_abandoned(&self, now: DateTime<Utc>) -> bool {
        self.lease_until <= now
    }
}

/// State of a task as a whole: the state of its last run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// No runs yet.
    Unscheduled,
    /// Last run pending.
    Pending,
    /// Last run running.
    Running,
    /// Last run completed.
    Completed,
    /// Last run failed.
    Failed,
    /// Last run resolved as exception.
    Exception,
}

impl From<RunState> for TaskState {
    fn from(state: RunState) -> Self {
        match state {
            RunState::Pending => Self::Pending,
            RunState::Running => Self::Running,
            RunState::Completed => Self::Completed,
            RunState::Failed => Self::Failed,
            RunState::Exception => Self::Exception,
        }
    }
}

/// Run as it appears in a status structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    /// Index of the run.
    pub run_id: usize,
    /// Run fields.
    #[serde(flatten)]
    pub run: Run,
}

/// Task status structure carried by published events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    /// Task id.
    pub task_id: String,
    /// Provisioner id.
    pub provisioner_id: String,
    /// Worker type.
    pub worker_type: String,
    /// Scheduler id.
    pub scheduler_id: String,
    /// Task group id.
    pub task_group_id: String,
    /// Deadline.
    pub deadline: DateTime<Utc>,
    /// Expiry.
    pub expires: DateTime<Utc>,
    /// Remaining automatic retries.
    pub retries_left: u32,
    /// Overall state.
    pub state: TaskState,
    /// Run history.
    pub runs: Vec<RunStatus>,
}

/// Caller-supplied fields of a new task.
#[derive(Debug, Clone)]
pub struct TaskDefinition {
    /// Task id.
    pub task_id: String,
    /// Provisioner id.
    pub provisioner_id: String,
    /// Worker type.
    pub worker_type: String,
    /// Scheduler id.
    pub scheduler_id: String,
    /// Task group id.
    pub task_group_id: String,
    /// Routing keys for published events.
    pub routes: Vec<String>,
    /// Scheduling priority.
    pub priority: TaskPriority,
    /// Automatic retry budget.
    pub retries: u32,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// Deadline.
    pub deadline: DateTime<Utc>,
    /// Expiry.
    pub expires: DateTime<Utc>,
}

/// A task and its runs, in stored form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Task id (partition key).
    pub task_id: String,
    /// Provisioner id.
    pub provisioner_id: String,
    /// Worker type.
    pub worker_type: String,
    /// Scheduler id.
    pub scheduler_id: String,
    /// Task group id.
    pub task_group_id: String,
    /// Routing keys for published events.
    pub routes: Vec<String>,
    /// Scheduling priority.
    pub priority: TaskPriority,
    /// Automatic retry budget.
    pub retries: u32,
    /// Retries not yet used.
    pub retries_left: u32,
    /// Creation time.
    #[serde(with = "ts_milliseconds")]
    pub created: DateTime<Utc>,
    /// Deadline.
    #[serde(with = "ts_milliseconds")]
    pub deadline: DateTime<Utc>,
    /// Expiry.
    #[serde(with = "ts_milliseconds")]
    pub expires: DateTime<Utc>,
    /// Run history.
    pub runs: Vec<Run>,
    /// Claim expiry of the running run, or the epoch when unclaimed.
    #[serde(with = "ts_milliseconds")]
    pub taken_until: DateTime<Utc>,
    /// Resolutions still being announced.
    #[serde(default)]
    pub pending_reports: Vec<PendingReport>,
}

impl Task {
    /// New task with one pending run scheduled at `now`.
    pub fn new(definition: TaskDefinition, now: DateTime<Utc>) -> Self {
        Self {
            task_id: definition.task_id,
            provisioner_id: definition.provisioner_id,
            worker_type: definition.worker_type,
            scheduler_id: definition.scheduler_id,
            task_group_id: definition.task_group_id,
            routes: definition.routes,
            priority: definition.priority,
            retries: definition.retries,
            retries_left: definition.retries,
            created: definition.created,
            deadline: definition.deadline,
            expires: definition.expires,
            runs: vec![Run::pending(ReasonCreated::Scheduled, now)],
            taken_until: zero_time(),
            pending_reports: Vec::new(),
        }
    }

    /// Run by id.
    pub fn run(&self, run_id: usize) -> Option<&Run> {
        self.runs.get(run_id)
    }

    /// Index of the last run.
    pub fn last_run_id(&self) -> Option<usize> {
        self.runs.len().checked_sub(1)
    }

    /// Unsent report for `run_id`.
    pub fn pending_report(&self, run_id: usize) -> Option<&PendingReport> {
        self.pending_reports.iter().find(|r| r.run_id == run_id)
    }

    /// Remove the given reports, matched by lease so a report taken over by
    /// another resolver is kept.
    pub fn settle_reports(&mut self, sent: &[PendingReport]) {
        self.pending_reports.retain(|report| !sent.contains(report));
    }

    /// Whether `taken_until` is the zero instant.
    pub fn is_unclaimed(&self) -> bool {
        self.taken_until == zero_time()
    }

    /// Overall state.
    pub fn state(&self) -> TaskState {
        self.runs
            .last()
            .map_or(TaskState::Unscheduled, |run| run.state.into())
    }

    /// Status structure for events.
    pub fn status(&self) -> TaskStatus {
        TaskStatus {
            task_id: self.task_id.clone(),
            provisioner_id: self.provisioner_id.clone(),
            worker_type: self.worker_type.clone(),
            scheduler_id: self.scheduler_id.clone(),
            task_group_id: self.task_group_id.clone(),
            deadline: self.deadline,
            expires: self.expires,
            retries_left: self.retries_left,
            state: self.state(),
            runs: self
                .runs
                .iter()
                .enumerate()
                .map(|(run_id, run)| RunStatus {
                    run_id,
                    run: run.clone(),
                })
                .collect(),
        }
    }

    /// Claim the pending last run. Returns `false` if it is not claimable.
    pub fn claim_run(
        &mut self,
        run_id: usize,
        worker_group: &str,
        worker_id: &str,
        taken_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.last_run_id() != Some(run_id) {
            return false;
        }
        let run = &mut self.runs[run_id];
        if run.state != RunState::Pending {
            return false;
        }
        run.state = RunState::Running;
        run.worker_group = Some(worker_group.to_owned());
        run.worker_id = Some(worker_id.to_owned());
        run.taken_until = Some(taken_until);
        run.started = Some(now);
        self.taken_until = taken_until;
        true
    }

    /// Resolve the running last run as completed or failed.
    pub fn resolve_run(&mut self, run_id: usize, success: bool, now: DateTime<Utc>) -> bool {
        if self.last_run_id() != Some(run_id) {
            return false;
        }
        let run = &mut self.runs[run_id];
        if run.state != RunState::Running {
            return false;
        }
        if success {
            run.state = RunState::Completed;
            run.reason_resolved = Some(ReasonResolved::Completed);
        } else {
            run.state = RunState::Failed;
            run.reason_resolved = Some(ReasonResolved::Failed);
        }
        run.resolved = Some(now);
        self.taken_until = zero_time();
        true
    }

    /// Check the structural invariants of the run history.
    pub fn check_invariants(&self) -> Result<(), String> {
        let last = self.last_run_id();
        for (run_id, run) in self.runs.iter().enumerate() {
            if !run.state.is_resolved() && Some(run_id) != last {
                return Err(format!("run {run_id} is {:?} but not the last run", run.state));
            }
        }
        if let Some(run) = self.runs.last() {
            if run.state == RunState::Running && run.taken_until != Some(self.taken_until) {
                return Err("takenUntil does not mirror the running run".into());
            }
        }
        for report in &self.pending_reports {
            if !self
                .run(report.run_id)
                .is_some_and(|run| run.state == RunState::Exception)
            {
                return Err(format!("report for run {} which is not an exception", report.run_id));
            }
        }
        if self.retries_left > self.retries {
            return Err(format!(
                "retriesLeft {} exceeds retries {}",
                self.retries_left, self.retries
            ));
        }
        Ok(())
    }
}

/// Key properties for loading a task.
pub fn task_key(task_id: &str) -> Value {
    json!({ "taskId": task_id })
}

const V1_PROPERTIES: [(&str, PropertyType); 13] = [
    ("taskId", PropertyType::String),
    ("provisionerId", PropertyType::String),
    ("workerType", PropertyType::String),
    ("schedulerId", PropertyType::String),
    ("taskGroupId", PropertyType::String),
    ("routes", PropertyType::Json),
    ("retries", PropertyType::Number),
    ("retriesLeft", PropertyType::Number),
    ("created", PropertyType::Date),
    ("deadline", PropertyType::Date),
    ("expires", PropertyType::Date),
    ("runs", PropertyType::Json),
    ("takenUntil", PropertyType::Date),
];

/// Schema of the task table.
///
/// Version 2 adds `priority`; older records are read as `normal`. Version 3
/// adds `pendingReports`, empty for older records.
pub fn task_schema(table_name: &str) -> Result<Schema, StoreError> {
    let v1 = V1_PROPERTIES.iter().copied();
    let v2 = v1.clone().chain([("priority", PropertyType::String)]);
    let v3 = v2.clone().chain([("pendingReports", PropertyType::Json)]);
    Schema::builder(table_name)
        .partition_key(KeyBuilder::string("taskId"))
        .row_key(KeyBuilder::constant("task"))
        .version(1, v1)
        .migrated_version(2, v2, |mut properties| {
            properties.insert("priority".into(), json!("normal"));
            Ok(properties)
        })
        .migrated_version(3, v3, |mut properties| {
            properties.insert("pendingReports".into(), json!([]));
            Ok(properties)
        })
        .build()
}
