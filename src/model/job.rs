//! Job identity, attributes, and lifecycle.
//!
//! A [`Job`] is exclusively owned by the core scheduler for mutation;
//! external clients observe it only through read APIs. See spec.md §3 for
//! the full data model and §4.G for the status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::value::Parameters;

/// Closed set of job lifecycle states (spec.md §3 `JobStatus`).
///
/// Transitions are enumerated in the state machine in spec.md §4.G; no
/// transition outside that diagram is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Scheduled,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// A job in a terminal state never transitions again except `Failed`,
    /// which may re-enter `Pending` via retry.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Cancelled)
    }

    pub fn is_queueable(self) -> bool {
        matches!(self, JobStatus::Pending)
    }
}

/// Priority band used for base score assignment (spec.md §4.D).
///
/// The raw integer priority on [`Job`] is the source of truth; the band is
/// derived from it purely to compute the base term of the dispatch score.
/// Thresholds (documented in DESIGN.md as an Open Question resolution):
/// `High` >= 500, `Medium` 100..500, `Low` < 100. 500 matches the
/// high-priority admission threshold already named in spec.md §4.F.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityBand {
    High,
    Medium,
    Low,
}

impl PriorityBand {
    pub fn from_priority(priority: i32) -> Self {
        if priority >= 500 {
            PriorityBand::High
        } else if priority >= 100 {
            PriorityBand::Medium
        } else {
            PriorityBand::Low
        }
    }

    /// Base score contribution, spec.md §4.D: HIGH=0, MEDIUM=1000, LOW=2000.
    pub fn base_score(self) -> f64 {
        match self {
            PriorityBand::High => 0.0,
            PriorityBand::Medium => 1000.0,
            PriorityBand::Low => 2000.0,
        }
    }
}

/// The worker a running/completed job is bound to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerBinding {
    pub worker_id: String,
    pub worker_name: String,
    pub host: String,
    pub port: Option<u16>,
    pub assigned_at: DateTime<Utc>,
}

/// A unit of schedulable work.
///
/// Identity is dual: `key` is the server-assigned numeric key used
/// internally for graph/queue bookkeeping, `job_id` is the client-visible
/// string identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub key: u64,
    pub job_id: String,
    pub name: String,
    pub job_type: String,
    pub parameters: Parameters,
    pub priority: i32,
    pub max_retries: i32,
    pub retry_count: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub worker_binding: Option<WorkerBinding>,
    pub created_at: DateTime<Utc>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub status: JobStatus,
}

impl Job {
    /// Construct a freshly submitted job in `Pending` status.
    pub fn new(key: u64, job_id: impl Into<String>, name: impl Into<String>, job_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            key,
            job_id: job_id.into(),
            name: name.into(),
            job_type: job_type.into(),
            parameters: Parameters::new(),
            priority: 0,
            max_retries: 3,
            retry_count: 0,
            scheduled_at: None,
            tags: Vec::new(),
            worker_binding: None,
            created_at: now,
            queued_at: None,
            started_at: None,
            completed_at: None,
            updated_at: now,
            error_message: None,
            result: None,
            status: JobStatus::Pending,
        }
    }

    /// Encoded priority-queue reference: `<numeric-key>:<string-id>`.
    pub fn queue_ref(&self) -> String {
        format!("{}:{}", self.key, self.job_id)
    }

    pub fn priority_band(&self) -> PriorityBand {
        PriorityBand::from_priority(self.priority)
    }

    /// Comma-joined tag list, as spec.md §3 describes it at the storage
    /// boundary (the in-memory `Vec<String>` is the working representation).
    pub fn tags_csv(&self) -> String {
        self.tags.join(",")
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at.map(|at| at < now).unwrap_or(false)
    }

    /// True once retries are exhausted and the job should be quarantined
    /// rather than rescheduled (spec.md §4.G).
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    pub fn resource_class(&self) -> Option<String> {
        if let Some(t) = self.parameters.get("resourceType").and_then(|v| v.as_str()) {
            return Some(t.to_string());
        }
        for tag in &self.tags {
            if let Some(class) = tag.strip_prefix("resource:") {
                return Some(class.to_string());
            }
        }
        None
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn mark_scheduled(&mut self, at: DateTime<Utc>) {
        self.scheduled_at = Some(at);
        self.status = JobStatus::Scheduled;
        self.touch();
    }

    pub fn mark_queued(&mut self) {
        self.status = JobStatus::Queued;
        self.queued_at = Some(Utc::now());
        self.touch();
    }

    /// Pull a `QUEUED` job back to `PENDING` because a new dependency
    /// edge just raised its in-degree above zero (spec.md §4.C
    /// `addDependency` may be called at any time, not only pre-dispatch).
    pub fn mark_blocked(&mut self) {
        self.status = JobStatus::Pending;
        self.queued_at = None;
        self.touch();
    }

    pub fn mark_running(&mut self, binding: WorkerBinding) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        self.worker_binding = Some(binding);
        self.touch();
    }

    /// Transition to `RUNNING` at dequeue time, before a worker has been
    /// selected (spec.md §4.D `popHighest`). The worker binding is attached
    /// afterward by the load balancer via [`Job::bind_worker`].
    pub fn mark_dispatching(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        self.touch();
    }

    /// Attach (or replace) the worker binding of an already-running job.
    pub fn bind_worker(&mut self, binding: WorkerBinding) {
        self.worker_binding = Some(binding);
        self.touch();
    }

    pub fn mark_completed(&mut self, result: Option<serde_json::Value>) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.result = result;
        self.touch();
    }

    pub fn mark_failed(&mut self, error_message: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error_message = Some(error_message.into());
        self.touch();
    }

    pub fn mark_cancelled(&mut self) {
        self.status = JobStatus::Cancelled;
        self.touch();
    }

    /// Reset for a retry attempt: clears the worker binding, bumps
    /// `retry_count`, and schedules the next attempt (spec.md §4.G).
    pub fn prepare_retry(&mut self, next_attempt_at: DateTime<Utc>) {
        self.retry_count += 1;
        self.worker_binding = None;
        self.started_at = None;
        self.scheduled_at = Some(next_attempt_at);
        self.status = JobStatus::Pending;
        self.touch();
    }

    /// Release from a lost worker for immediate reassignment, without
    /// counting as a retry attempt (spec.md §4.G worker-failure handling).
    pub fn release_for_reassignment(&mut self) {
        self.worker_binding = None;
        self.started_at = None;
        self.status = JobStatus::Pending;
        self.touch();
    }
}
