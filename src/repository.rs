//! Persistent store contracts (spec.md §4.B, §6).
//!
//! These are the interfaces the core scheduler calls; the relational
//! store behind them is an external collaborator and is out of scope.
//! Every status transition the core makes is expected to commit inside a
//! single transaction that also updates counters (spec.md §6 Persistent
//! store contract) — that transactional boundary lives in the
//! implementation of these traits, not in this crate.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{DeadLetterEntry, ExecutionHistoryEntry, Job, JobDependency, JobStatus, Worker};

/// Persistence contract for jobs.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn save(&self, job: &Job) -> Result<()>;
    async fn find_by_key(&self, key: u64) -> Result<Option<Job>>;
    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<Job>>;
    async fn find_by_worker_id(&self, worker_id: &str) -> Result<Vec<Job>>;
    async fn count_by_status(&self, status: JobStatus) -> Result<u64>;
    async fn find_by_assigned_worker_and_status_in(&self, worker_id: &str, statuses: &[JobStatus]) -> Result<Vec<Job>>;
    async fn find_by_status_and_started_before(&self, status: JobStatus, before: chrono::DateTime<chrono::Utc>) -> Result<Vec<Job>>;
    async fn delete(&self, key: u64) -> Result<()>;
}

/// Persistence contract for dependency edges.
#[async_trait]
pub trait DependencyRepository: Send + Sync {
    async fn save(&self, dependency: &JobDependency) -> Result<()>;
    async fn delete(&self, child_key: u64, parent_key: u64) -> Result<()>;
    async fn find_by_child(&self, child_key: u64) -> Result<Vec<JobDependency>>;
    async fn find_by_parent(&self, parent_key: u64) -> Result<Vec<JobDependency>>;
    async fn find_all(&self) -> Result<Vec<JobDependency>>;
    /// Opaque storage-provided circular-dependency check (spec.md §4.C
    /// cycle detector #3). Optional: implementations may return `Ok(vec![])`
    /// unconditionally if the backing store has no such query.
    async fn find_circular_dependencies(&self) -> Result<Vec<Vec<u64>>>;
}

/// Persistence contract for workers.
#[async_trait]
pub trait WorkerRepository: Send + Sync {
    async fn save(&self, worker: &Worker) -> Result<()>;
    async fn find_by_id(&self, worker_id: &str) -> Result<Option<Worker>>;
    async fn find_all(&self) -> Result<Vec<Worker>>;
    async fn find_by_last_heartbeat_before(&self, before: chrono::DateTime<chrono::Utc>) -> Result<Vec<Worker>>;
    /// Workers whose heartbeat is older than `threshold` and are therefore
    /// candidates for cleanup/failure (spec.md §6 `findPotentiallyDeadWorkers`).
    async fn find_potentially_dead(&self, threshold: chrono::Duration) -> Result<Vec<Worker>>;
    async fn delete(&self, worker_id: &str) -> Result<()>;
}

/// Persistence contract for execution history and the dead-letter queue.
#[async_trait]
pub trait HistoryRepository: Send + Sync {
    async fn append(&self, entry: &ExecutionHistoryEntry) -> Result<()>;
    async fn recent(&self, limit: usize) -> Result<Vec<ExecutionHistoryEntry>>;
    async fn prune_older_than(&self, retention: chrono::Duration) -> Result<u64>;

    async fn dead_letter_put(&self, entry: &DeadLetterEntry) -> Result<()>;
    async fn dead_letter_remove(&self, job_key: u64) -> Result<Option<DeadLetterEntry>>;
    async fn dead_letter_all(&self) -> Result<Vec<DeadLetterEntry>>;
    async fn dead_letter_prune_older_than(&self, retention: chrono::Duration) -> Result<u64>;
}
