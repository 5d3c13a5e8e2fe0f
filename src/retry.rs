//! Failure and retry controller (spec.md §4.G).
//!
//! Owns job-failure handling (retry with jittered exponential backoff or
//! dead-letter quarantine), worker-loss reassignment, and the stuck-job
//! sweep. The dead-letter queue is a bounded, TTL'd FIFO layered on top of
//! [`ExecutionHistory`]'s dead-letter passthroughs; every event this
//! controller records goes through that wrapper rather than straight to
//! the repository, so `scheduler.history`'s ring buffer and counters stay
//! complete.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::balancer::LoadBalancer;
use crate::error::Result;
use crate::history::ExecutionHistory;
use crate::model::{DeadLetterEntry, ExecutionHistoryEntry, HistoryEventKind, Job, JobStatus};
use crate::repository::JobRepository;

/// Retry backoff and dead-letter tunables (spec.md §6 `job.retry.*`,
/// `dead-letter-queue.*`).
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub base_delay: StdDuration,
    pub backoff_multiplier: f64,
    pub max_delay: StdDuration,
    pub dlq_max_size: usize,
    pub dlq_retention: chrono::Duration,
    pub stuck_job_threshold: StdDuration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: StdDuration::from_secs(5),
            backoff_multiplier: 2.0,
            max_delay: StdDuration::from_secs(300),
            dlq_max_size: 1_000,
            dlq_retention: chrono::Duration::days(30),
            stuck_job_threshold: StdDuration::from_secs(2 * 60 * 60),
        }
    }
}

/// `min(base * multiplier^(retry_count - 1) * (1 + U[0, 0.3]), max)`,
/// seconds. `retry_count` is the attempt number about to be scheduled
/// (1-indexed).
pub fn backoff_delay(retry_count: i32, config: &RetryConfig) -> StdDuration {
    let base = config.base_delay.as_secs_f64();
    let exponent = (retry_count - 1).max(0) as i32;
    let jitter = 1.0 + fastrand::f64() * 0.3;
    let seconds = (base * config.backoff_multiplier.powi(exponent) * jitter).min(config.max_delay.as_secs_f64());
    StdDuration::from_secs_f64(seconds.max(0.0))
}

pub struct RetryController {
    jobs: Arc<dyn JobRepository>,
    history: Arc<ExecutionHistory>,
    config: RetryConfig,
}

impl RetryController {
    /// `history` must be the same instance [`crate::scheduler::Scheduler`]
    /// exposes — going through [`ExecutionHistory`] rather than straight to
    /// [`crate::repository::HistoryRepository`] keeps its in-memory ring
    /// buffer and counters in sync with every retry/DLQ/reassignment event.
    pub fn new(jobs: Arc<dyn JobRepository>, history: Arc<ExecutionHistory>) -> Self {
        Self { jobs, history, config: RetryConfig::default() }
    }

    pub fn with_config(mut self, config: RetryConfig) -> Self {
        self.config = config;
        self
    }

    /// Handle a job failure: persist `FAILED`, append history, then either
    /// schedule a retry or move the job to the dead-letter queue.
    pub async fn handle_job_failure(&self, job: &mut Job, error_message: impl Into<String>) -> Result<()> {
        let error_message = error_message.into();
        job.mark_failed(error_message.clone());
        self.jobs.save(job).await?;
        self.history
            .record(ExecutionHistoryEntry::new(job.name.clone(), HistoryEventKind::JobFailed, error_message.clone()).with_job_key(job.key).with_retry_count(job.retry_count))
            .await?;

        if job.retries_exhausted() {
            self.move_to_dlq(job, "maximum retry attempts exceeded").await?;
        } else {
            let next_retry_count = job.retry_count + 1;
            let delay = backoff_delay(next_retry_count, &self.config);
            let next_attempt_at = Utc::now() + chrono::Duration::from_std(delay).unwrap();
            job.prepare_retry(next_attempt_at);
            self.jobs.save(job).await?;
            self.history
                .record(ExecutionHistoryEntry::new(job.name.clone(), HistoryEventKind::JobRetry, format!("retry {} scheduled in {delay:?}", job.retry_count)).with_job_key(job.key).with_retry_count(job.retry_count))
                .await?;
        }
        Ok(())
    }

    async fn move_to_dlq(&self, job: &Job, reason: impl Into<String>) -> Result<()> {
        let mut entry = DeadLetterEntry::new(job.key, job.name.clone(), job.job_type.clone(), reason);
        entry.retry_count = job.retry_count;
        entry.error_message = job.error_message.clone();
        entry.last_worker_id = job.worker_binding.as_ref().map(|b| b.worker_id.clone());

        self.history.dead_letter_put(&entry).await?;
        self.enforce_dlq_bound().await?;

        self.history
            .record(ExecutionHistoryEntry::new(job.name.clone(), HistoryEventKind::MovedToDlq, entry.failure_reason.clone()).with_job_key(job.key).with_retry_count(job.retry_count))
            .await?;
        warn!(job_key = job.key, "job moved to dead-letter queue");
        Ok(())
    }

    /// Evict the oldest dead-letter entry if the bounded FIFO is over
    /// capacity (spec.md §4.G DLQ semantics).
    async fn enforce_dlq_bound(&self) -> Result<()> {
        let mut entries = self.history.dead_letter_all().await?;
        if entries.len() <= self.config.dlq_max_size {
            return Ok(());
        }
        entries.sort_by_key(|e| e.created_at);
        let overflow = entries.len() - self.config.dlq_max_size;
        for entry in entries.into_iter().take(overflow) {
            self.history.dead_letter_remove(entry.job_key).await?;
        }
        Ok(())
    }

    /// Remove a job from the DLQ and return it to `PENDING` so the
    /// dispatcher can re-enqueue it.
    pub async fn retry_from_dlq(&self, job_key: u64, reset_retry_count: bool) -> Result<Option<Job>> {
        let Some(_entry) = self.history.dead_letter_remove(job_key).await? else {
            return Ok(None);
        };
        let Some(mut job) = self.jobs.find_by_key(job_key).await? else {
            return Ok(None);
        };
        job.worker_binding = None;
        job.started_at = None;
        if reset_retry_count {
            job.retry_count = 0;
        }
        job.status = JobStatus::Pending;
        self.jobs.save(&job).await?;
        Ok(Some(job))
    }

    /// On a worker transitioning to `ERROR`: release its `RUNNING`/`QUEUED`
    /// jobs back to `PENDING`, log the reassignment, and attempt immediate
    /// reassignment through the load balancer.
    pub async fn reassign_jobs_from_failed_worker(&self, worker_id: &str, balancer: &LoadBalancer) -> Result<Vec<u64>> {
        let jobs = self.jobs.find_by_assigned_worker_and_status_in(worker_id, &[JobStatus::Running, JobStatus::Queued]).await?;
        let mut released = Vec::new();

        for mut job in jobs {
            job.release_for_reassignment();
            self.jobs.save(&job).await?;
            self.history
                .record(
                    ExecutionHistoryEntry::new(job.name.clone(), HistoryEventKind::JobReassigned, format!("worker {worker_id} lost"))
                        .with_job_key(job.key)
                        .with_worker_id(worker_id),
                )
                .await?;

            if let Some(mut target) = balancer.select_worker(&job).await? {
                job.mark_dispatching();
                if let Err(e) = balancer.bind(&mut job, &mut target).await {
                    warn!(job_key = job.key, error = %e, "immediate reassignment failed, job stays PENDING");
                }
            }
            released.push(job.key);
        }

        info!(worker_id, count = released.len(), "released jobs from failed worker");
        Ok(released)
    }

    /// Periodic stuck-job sweep (default every 2 hours): jobs `RUNNING`
    /// longer than `stuck_job_threshold` are timed out and handed to
    /// [`RetryController::handle_job_failure`].
    pub async fn stuck_job_sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - chrono::Duration::from_std(self.config.stuck_job_threshold).unwrap();
        let stuck = self.jobs.find_by_status_and_started_before(JobStatus::Running, cutoff).await?;
        let count = stuck.len();
        for mut job in stuck {
            self.history
                .record(ExecutionHistoryEntry::new(job.name.clone(), HistoryEventKind::JobTimeout, "job exceeded running timeout").with_job_key(job.key))
                .await?;
            self.handle_job_failure(&mut job, "Job execution timeout").await?;
        }
        Ok(count)
    }

    /// Evict dead-letter entries past their TTL (default 30 days, spec.md
    /// §4.G "bounded FIFO with TTL"), independent of the size-bound
    /// eviction `move_to_dlq` already enforces on insertion.
    pub async fn cleanup_dlq(&self) -> Result<u64> {
        self.history.dead_letter_prune_older_than(self.config.dlq_retention).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::testing::InMemoryCache;
    use crate::model::Worker;
    use crate::repository::{HistoryRepository, WorkerRepository};
    use async_trait::async_trait;
    use dashmap::DashMap;

    #[derive(Default)]
    struct InMemoryJobRepo {
        jobs: DashMap<u64, Job>,
    }

    #[async_trait]
    impl JobRepository for InMemoryJobRepo {
        async fn save(&self, job: &Job) -> Result<()> {
            self.jobs.insert(job.key, job.clone());
            Ok(())
        }
        async fn find_by_key(&self, key: u64) -> Result<Option<Job>> {
            Ok(self.jobs.get(&key).map(|j| j.clone()))
        }
        async fn find_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
            Ok(self.jobs.iter().filter(|e| e.status == status).map(|e| e.clone()).collect())
        }
        async fn find_by_worker_id(&self, worker_id: &str) -> Result<Vec<Job>> {
            Ok(self.jobs.iter().filter(|e| e.worker_binding.as_ref().map(|b| b.worker_id == worker_id).unwrap_or(false)).map(|e| e.clone()).collect())
        }
        async fn count_by_status(&self, status: JobStatus) -> Result<u64> {
            Ok(self.jobs.iter().filter(|e| e.status == status).count() as u64)
        }
        async fn find_by_assigned_worker_and_status_in(&self, worker_id: &str, statuses: &[JobStatus]) -> Result<Vec<Job>> {
            Ok(self
                .jobs
                .iter()
                .filter(|e| statuses.contains(&e.status) && e.worker_binding.as_ref().map(|b| b.worker_id == worker_id).unwrap_or(false))
                .map(|e| e.clone())
                .collect())
        }
        async fn find_by_status_and_started_before(&self, status: JobStatus, before: DateTime<Utc>) -> Result<Vec<Job>> {
            Ok(self.jobs.iter().filter(|e| e.status == status && e.started_at.map(|s| s < before).unwrap_or(false)).map(|e| e.clone()).collect())
        }
        async fn delete(&self, key: u64) -> Result<()> {
            self.jobs.remove(&key);
            Ok(())
        }
    }

    #[derive(Default)]
    struct InMemoryHistoryRepo {
        entries: std::sync::Mutex<Vec<ExecutionHistoryEntry>>,
        dlq: DashMap<u64, DeadLetterEntry>,
    }

    #[async_trait]
    impl HistoryRepository for InMemoryHistoryRepo {
        async fn append(&self, entry: &ExecutionHistoryEntry) -> Result<()> {
            self.entries.lock().unwrap().push(entry.clone());
            Ok(())
        }
        async fn recent(&self, limit: usize) -> Result<Vec<ExecutionHistoryEntry>> {
            let entries = self.entries.lock().unwrap();
            Ok(entries.iter().rev().take(limit).cloned().collect())
        }
        async fn prune_older_than(&self, _retention: chrono::Duration) -> Result<u64> {
            Ok(0)
        }
        async fn dead_letter_put(&self, entry: &DeadLetterEntry) -> Result<()> {
            self.dlq.insert(entry.job_key, entry.clone());
            Ok(())
        }
        async fn dead_letter_remove(&self, job_key: u64) -> Result<Option<DeadLetterEntry>> {
            Ok(self.dlq.remove(&job_key).map(|(_, v)| v))
        }
        async fn dead_letter_all(&self) -> Result<Vec<DeadLetterEntry>> {
            Ok(self.dlq.iter().map(|e| e.clone()).collect())
        }
        async fn dead_letter_prune_older_than(&self, _retention: chrono::Duration) -> Result<u64> {
            Ok(0)
        }
    }

    #[derive(Default)]
    struct InMemoryWorkerRepo {
        workers: DashMap<String, Worker>,
    }

    #[async_trait]
    impl WorkerRepository for InMemoryWorkerRepo {
        async fn save(&self, worker: &Worker) -> Result<()> {
            self.workers.insert(worker.worker_id.clone(), worker.clone());
            Ok(())
        }
        async fn find_by_id(&self, worker_id: &str) -> Result<Option<Worker>> {
            Ok(self.workers.get(worker_id).map(|w| w.clone()))
        }
        async fn find_all(&self) -> Result<Vec<Worker>> {
            Ok(self.workers.iter().map(|w| w.clone()).collect())
        }
        async fn find_by_last_heartbeat_before(&self, _before: DateTime<Utc>) -> Result<Vec<Worker>> {
            Ok(Vec::new())
        }
        async fn find_potentially_dead(&self, _threshold: chrono::Duration) -> Result<Vec<Worker>> {
            Ok(Vec::new())
        }
        async fn delete(&self, worker_id: &str) -> Result<()> {
            self.workers.remove(worker_id);
            Ok(())
        }
    }

    fn make_controller() -> (RetryController, Arc<InMemoryJobRepo>, Arc<InMemoryHistoryRepo>) {
        let jobs = Arc::new(InMemoryJobRepo::default());
        let history_repo = Arc::new(InMemoryHistoryRepo::default());
        let history = Arc::new(ExecutionHistory::new(history_repo.clone()));
        let controller = RetryController::new(jobs.clone(), history)
            .with_config(RetryConfig { base_delay: StdDuration::from_secs(1), backoff_multiplier: 2.0, max_delay: StdDuration::from_secs(300), ..RetryConfig::default() });
        (controller, jobs, history_repo)
    }

    #[tokio::test]
    async fn retry_then_dlq_scenario() {
        // Scenario 3 (spec.md §8): max_retries=2, base_delay=1s, multiplier=2.
        let (controller, jobs, history) = make_controller();
        let mut job = Job::new(1, "j1", "n", "t");
        job.max_retries = 2;

        controller.handle_job_failure(&mut job, "boom 1").await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 1);

        controller.handle_job_failure(&mut job, "boom 2").await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 2);

        controller.handle_job_failure(&mut job, "boom 3").await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);

        let dlq = history.dead_letter_all().await.unwrap();
        assert_eq!(dlq.len(), 1);

        let entries = history.recent(100).await.unwrap();
        let failed_count = entries.iter().filter(|e| e.kind == HistoryEventKind::JobFailed).count();
        let dlq_count = entries.iter().filter(|e| e.kind == HistoryEventKind::MovedToDlq).count();
        assert_eq!(failed_count, 3);
        assert_eq!(dlq_count, 1);

        assert!(jobs.find_by_key(1).await.unwrap().unwrap().status == JobStatus::Failed);
    }

    #[tokio::test]
    async fn retry_from_dlq_returns_job_to_pending() {
        let (controller, jobs, history) = make_controller();
        let mut job = Job::new(1, "j1", "n", "t");
        job.max_retries = 0;
        jobs.save(&job).await.unwrap();
        controller.handle_job_failure(&mut job, "boom").await.unwrap();
        assert!(history.dead_letter_all().await.unwrap().len() == 1);

        let revived = controller.retry_from_dlq(1, true).await.unwrap().unwrap();
        assert_eq!(revived.status, JobStatus::Pending);
        assert_eq!(revived.retry_count, 0);
        assert!(history.dead_letter_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn backoff_delay_grows_with_retry_count_and_clamps_to_max() {
        let config = RetryConfig { base_delay: StdDuration::from_secs(5), backoff_multiplier: 2.0, max_delay: StdDuration::from_secs(20), ..RetryConfig::default() };
        let first = backoff_delay(1, &config);
        let third = backoff_delay(3, &config);
        assert!(first.as_secs_f64() >= 5.0 && first.as_secs_f64() <= 6.5);
        assert!(third.as_secs_f64() <= 20.0);
    }
}
