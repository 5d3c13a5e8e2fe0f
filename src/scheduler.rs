//! Top-level wiring (spec.md §2, §9 "explicit instance, not a singleton").
//!
//! [`Scheduler`] owns one instance of every component — the dependency
//! graph, priority queue, worker registry, load balancer, retry
//! controller, execution history, cron scheduler, and resource admission
//! controller — plus the repository handles they share. It is the single
//! object application code constructs and holds; nothing in this crate
//! reaches for global or lazily-initialized state. [`ControlLoop`]
//! (control_loop.rs) is the thing that drives it on a schedule; this
//! module only implements the request/response operations (submit,
//! complete, fail, cancel, add/remove dependency).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::balancer::LoadBalancer;
use crate::cache::Cache;
use crate::config::SchedulerConfig;
use crate::cron::CronScheduler;
use crate::error::{Result, SchedulerError, Verdict};
use crate::graph::DependencyGraph;
use crate::history::ExecutionHistory;
use crate::inheritance::PriorityInheritance;
use crate::model::{DependencyKind, Job, JobDependency, JobStatus, Parameters};
use crate::queue::PriorityQueue;
use crate::repository::{DependencyRepository, JobRepository, WorkerRepository};
use crate::resources::ResourceAdmissionController;
use crate::retry::RetryController;
use crate::workers::WorkerRegistry;

/// Input to [`Scheduler::submit_job`]. Key assignment, `created_at`, and
/// initial status are the scheduler's job, not the caller's.
#[derive(Debug, Clone)]
pub struct JobSubmission {
    pub job_id: String,
    pub name: String,
    pub job_type: String,
    pub parameters: Parameters,
    pub priority: i32,
    pub max_retries: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    /// Parent dependencies to establish before deciding whether this job
    /// is ready to enqueue (spec.md §2 flow: "submit → records
    /// dependencies → enqueues if ready"). Edges that would create a
    /// cycle are skipped; the job is still created.
    pub dependencies: Vec<(u64, DependencyKind)>,
}

impl JobSubmission {
    pub fn new(job_id: impl Into<String>, name: impl Into<String>, job_type: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            name: name.into(),
            job_type: job_type.into(),
            parameters: Parameters::new(),
            priority: 0,
            max_retries: 3,
            scheduled_at: None,
            tags: Vec::new(),
            dependencies: Vec::new(),
        }
    }
}

/// Owns one instance of every scheduler component. Construct with
/// [`SchedulerBuilder`].
pub struct Scheduler {
    pub graph: DependencyGraph,
    pub queue: PriorityQueue,
    pub workers: WorkerRegistry,
    pub balancer: LoadBalancer,
    pub retry: RetryController,
    pub history: Arc<ExecutionHistory>,
    pub cron: CronScheduler,
    pub resources: ResourceAdmissionController,
    pub inheritance: PriorityInheritance,
    pub config: SchedulerConfig,
    pub jobs: Arc<dyn JobRepository>,
    pub dependencies: Arc<dyn DependencyRepository>,
    pub worker_repo: Arc<dyn WorkerRepository>,
    next_key: AtomicU64,
}

/// Builds a [`Scheduler`] from its repository and cache collaborators,
/// wiring every component with [`SchedulerConfig`] in one place (spec.md
/// §9 "construct once, pass the instance down").
pub struct SchedulerBuilder {
    cache: Arc<dyn Cache>,
    jobs: Arc<dyn JobRepository>,
    dependencies: Arc<dyn DependencyRepository>,
    worker_repo: Arc<dyn WorkerRepository>,
    history_repo: Arc<dyn crate::repository::HistoryRepository>,
    config: SchedulerConfig,
}

impl SchedulerBuilder {
    pub fn new(
        cache: Arc<dyn Cache>,
        jobs: Arc<dyn JobRepository>,
        dependencies: Arc<dyn DependencyRepository>,
        worker_repo: Arc<dyn WorkerRepository>,
        history_repo: Arc<dyn crate::repository::HistoryRepository>,
    ) -> Self {
        Self { cache, jobs, dependencies, worker_repo, history_repo, config: SchedulerConfig::default() }
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Scheduler {
        let queue = PriorityQueue::new(self.cache.clone(), self.jobs.clone()).with_capacities(self.config.queue_capacities);
        let balancer = LoadBalancer::new(self.cache.clone(), self.worker_repo.clone(), self.jobs.clone())
            .with_strategy(self.config.load_balancing_strategy)
            .with_rebalance_thresholds(self.config.rebalance);
        let workers = WorkerRegistry::new(self.cache.clone(), self.worker_repo.clone()).with_config(self.config.worker_registry);
        let history = Arc::new(ExecutionHistory::new(self.history_repo.clone()).with_config(self.config.history));
        let retry = RetryController::new(self.jobs.clone(), history.clone()).with_config(self.config.retry);
        let inheritance = PriorityInheritance::new(
            crate::inheritance::InheritanceStrategy::default(),
            self.config.priority_inheritance_decay,
            self.config.priority_inheritance_max_depth,
        );

        Scheduler {
            graph: DependencyGraph::new(),
            queue,
            workers,
            balancer,
            retry,
            history,
            cron: CronScheduler::new(),
            resources: ResourceAdmissionController::new(),
            inheritance,
            config: self.config,
            jobs: self.jobs,
            dependencies: self.dependencies,
            worker_repo: self.worker_repo,
            next_key: AtomicU64::new(0),
        }
    }
}

impl Scheduler {
    /// Monotonically increasing job key, used for both client submissions
    /// and cron-materialized jobs.
    pub fn next_key(&self) -> u64 {
        self.next_key.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Register a new job (spec.md §4.A/§4.D). If `scheduled_at` is in the
    /// future the job starts life as `SCHEDULED`; otherwise it is admitted
    /// and enqueued immediately, subject to resource admission.
    pub async fn submit_job(&self, submission: JobSubmission) -> Result<Job> {
        let key = self.next_key();
        let mut job = Job::new(key, submission.job_id, submission.name, submission.job_type);
        job.parameters = submission.parameters;
        job.priority = submission.priority;
        if submission.max_retries >= 0 {
            job.max_retries = submission.max_retries;
        }
        job.tags = submission.tags;

        self.graph.register_job(key).await;
        self.jobs.save(&job).await?;

        for (parent, kind) in submission.dependencies {
            if let Err(e) = self.add_dependency(key, parent, kind).await {
                warn!(job_key = key, parent, error = %e, "dependency from submission payload rejected");
            }
        }

        if let Some(at) = submission.scheduled_at {
            if at > Utc::now() {
                let mut job = self.jobs.find_by_key(key).await?.expect("job just saved");
                job.mark_scheduled(at);
                self.jobs.save(&job).await?;
                return self.jobs.find_by_key(key).await.map(|j| j.expect("job just saved"));
            }
        }

        if self.graph.in_degree(key).await == 0 {
            self.admit_and_enqueue(key).await?;
        }
        self.jobs.find_by_key(key).await.map(|j| j.expect("job just saved"))
    }

    /// Attempt to move a `PENDING` job into the priority queue, gated by
    /// resource admission (spec.md §4.F). A job whose resource class is
    /// at capacity is left `PENDING`, parked in that constraint's FIFO;
    /// it is re-attempted when the constraint next releases a slot.
    pub async fn admit_and_enqueue(&self, key: u64) -> Result<()> {
        let Some(mut job) = self.jobs.find_by_key(key).await? else {
            return Ok(());
        };
        if job.status != JobStatus::Pending {
            return Ok(());
        }
        if !self.resources.try_admit(&job) {
            return Ok(());
        }
        match self.queue.enqueue(&mut job).await {
            Ok(()) => Ok(()),
            Err(SchedulerError::Transient(msg)) => {
                warn!(job_key = key, reason = %msg, "queue at capacity, job stays pending");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Add a dependency edge and apply priority inheritance from the
    /// direct parent (spec.md §4.C, §4.J). See DESIGN.md for why
    /// inheritance here only considers the direct parent rather than the
    /// full ancestor chain.
    pub async fn add_dependency(&self, child: u64, parent: u64, kind: DependencyKind) -> Result<Verdict> {
        let verdict = self.graph.add_dependency(child, parent).await?;
        if verdict.ok {
            let dependency = JobDependency::new(child, parent, kind);
            self.dependencies.save(&dependency).await?;
            self.block_if_already_queued(child).await?;
            self.apply_priority_inheritance(child, parent).await?;
        }
        Ok(verdict)
    }

    /// A dependency can be added to a job that's already sitting in the
    /// priority queue (spec.md §4.C places no ordering restriction on
    /// `addDependency`); pull it back out so it isn't dispatched before
    /// its new parent completes.
    async fn block_if_already_queued(&self, child: u64) -> Result<()> {
        let Some(mut child_job) = self.jobs.find_by_key(child).await? else {
            return Ok(());
        };
        if child_job.status == JobStatus::Queued {
            self.queue.remove(&child_job).await?;
            child_job.mark_blocked();
            self.jobs.save(&child_job).await?;
        }
        Ok(())
    }

    async fn apply_priority_inheritance(&self, child: u64, parent: u64) -> Result<()> {
        let Some(mut child_job) = self.jobs.find_by_key(child).await? else {
            return Ok(());
        };
        let Some(parent_job) = self.jobs.find_by_key(parent).await? else {
            return Ok(());
        };

        let inherited = self.inheritance.inherit(child_job.priority, &[(parent_job.priority, 1)]);
        if inherited > child_job.priority {
            child_job.priority = inherited;
            self.jobs.save(&child_job).await?;
            if child_job.status == JobStatus::Queued {
                self.queue.update_priority(&child_job).await?;
            }
        }
        Ok(())
    }

    pub async fn remove_dependency(&self, child: u64, parent: u64) -> Result<()> {
        self.graph.remove_dependency(child, parent).await;
        self.dependencies.delete(child, parent).await
    }

    /// Mark a job complete, release its worker binding, and enqueue any
    /// children the dependency graph now finds ready plus any job a freed
    /// resource slot admits. Returns the keys of every job newly made
    /// eligible for dispatch (spec.md §8 scenario 2).
    pub async fn complete_job(&self, key: u64, result: Option<serde_json::Value>) -> Result<Vec<u64>> {
        let Some(mut job) = self.jobs.find_by_key(key).await? else {
            return Err(SchedulerError::NotFound(format!("job {key}")));
        };

        if let Some(binding) = job.worker_binding.clone() {
            if let Some(mut worker) = self.worker_repo.find_by_id(&binding.worker_id).await? {
                worker.unassign_job(key);
                let elapsed = job.started_at.map(|at| (Utc::now() - at).num_milliseconds() as f64).unwrap_or(0.0);
                worker.record_success(elapsed);
                self.worker_repo.save(&worker).await?;
            }
        }

        job.mark_completed(result);
        self.jobs.save(&job).await?;
        self.queue.move_to_completed(&job).await?;

        let mut newly_ready = Vec::new();
        let pending = self.pending_key_set().await?;
        for ready_key in self.graph.mark_completed(key, &pending).await {
            self.admit_and_enqueue(ready_key).await?;
            newly_ready.push(ready_key);
        }

        if let Some(admitted_key) = self.resources.release(&job) {
            self.admit_and_enqueue(admitted_key).await?;
            newly_ready.push(admitted_key);
        }

        Ok(newly_ready)
    }

    /// Record a job failure and run it through the retry controller
    /// (spec.md §4.G). If the job is scheduled for retry rather than
    /// moved to the dead-letter queue, it is re-enqueued immediately —
    /// its `scheduled_at` keeps it from scoring as overdue until the
    /// backoff delay elapses (spec.md §4.D score formula).
    pub async fn fail_job(&self, key: u64, error_message: impl Into<String>) -> Result<()> {
        let Some(mut job) = self.jobs.find_by_key(key).await? else {
            return Err(SchedulerError::NotFound(format!("job {key}")));
        };

        if let Some(binding) = job.worker_binding.clone() {
            if let Some(mut worker) = self.worker_repo.find_by_id(&binding.worker_id).await? {
                worker.unassign_job(key);
                worker.record_failure(0.0);
                self.worker_repo.save(&worker).await?;
            }
        }

        self.queue.move_to_failed(&job).await?;
        self.retry.handle_job_failure(&mut job, error_message).await?;

        if job.status == JobStatus::Pending {
            self.admit_and_enqueue(job.key).await?;
        }
        Ok(())
    }

    /// Cancel a job. Queued/scheduled/pending jobs are removed outright;
    /// a running job is marked cancelled best-effort — informing its
    /// worker is out of scope for this crate (spec.md §1).
    pub async fn cancel_job(&self, key: u64) -> Result<Verdict> {
        let Some(mut job) = self.jobs.find_by_key(key).await? else {
            return Err(SchedulerError::NotFound(format!("job {key}")));
        };

        match job.status {
            JobStatus::Pending | JobStatus::Scheduled => {
                job.mark_cancelled();
                self.jobs.save(&job).await?;
                Ok(Verdict::ok("job cancelled"))
            }
            JobStatus::Queued => {
                self.queue.remove(&job).await?;
                job.mark_cancelled();
                self.jobs.save(&job).await?;
                Ok(Verdict::ok("job cancelled"))
            }
            JobStatus::Running => {
                job.mark_cancelled();
                self.jobs.save(&job).await?;
                info!(job_key = key, "running job marked cancelled; worker notification is out of scope");
                Ok(Verdict::ok("job marked cancelled; best-effort, worker runs out of band"))
            }
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => Ok(Verdict::rejected("job already in a terminal state", None)),
        }
    }

    async fn pending_key_set(&self) -> Result<std::collections::HashSet<u64>> {
        Ok(self.jobs.find_by_status(JobStatus::Pending).await?.into_iter().map(|j| j.key).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::testing::InMemoryCache;
    use crate::testing::{InMemoryDependencyRepository, InMemoryHistoryRepository, InMemoryJobRepository, InMemoryWorkerRepository};

    fn scheduler() -> Scheduler {
        SchedulerBuilder::new(
            Arc::new(InMemoryCache::new()),
            Arc::new(InMemoryJobRepository::new()),
            Arc::new(InMemoryDependencyRepository::new()),
            Arc::new(InMemoryWorkerRepository::new()),
            Arc::new(InMemoryHistoryRepository::new()),
        )
        .build()
    }

    #[tokio::test]
    async fn submit_job_with_no_schedule_is_enqueued_immediately() {
        let scheduler = scheduler();
        let job = scheduler.submit_job(JobSubmission::new("j1", "first", "report")).await.unwrap();
        let popped = scheduler.queue.pop_highest(job.priority_band()).await.unwrap();
        assert_eq!(popped.unwrap().key, job.key);
    }

    #[tokio::test]
    async fn submit_job_with_future_schedule_stays_scheduled() {
        let scheduler = scheduler();
        let mut submission = JobSubmission::new("j1", "first", "report");
        submission.scheduled_at = Some(Utc::now() + chrono::Duration::hours(1));
        let job = scheduler.submit_job(submission).await.unwrap();
        assert_eq!(job.status, JobStatus::Scheduled);
        assert!(scheduler.queue.pop_highest(job.priority_band()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn add_dependency_blocks_child_until_parent_completes() {
        let scheduler = scheduler();
        let parent = scheduler.submit_job(JobSubmission::new("p", "parent", "t")).await.unwrap();
        let child = scheduler.submit_job(JobSubmission::new("c", "child", "t")).await.unwrap();

        // The child was already auto-enqueued at submission time (it had
        // no dependency yet); adding one now must pull it back out.
        let verdict = scheduler.add_dependency(child.key, parent.key, DependencyKind::MustComplete).await.unwrap();
        assert!(verdict.ok);
        assert_eq!(scheduler.jobs.find_by_key(child.key).await.unwrap().unwrap().status, JobStatus::Pending);
        assert!(scheduler.queue.pop_highest(child.priority_band()).await.unwrap().is_none());

        let ready = scheduler.complete_job(parent.key, None).await.unwrap();
        assert_eq!(ready, vec![child.key]);
    }

    #[tokio::test]
    async fn submission_with_inline_dependency_starts_blocked() {
        let scheduler = scheduler();
        let parent = scheduler.submit_job(JobSubmission::new("p", "parent", "t")).await.unwrap();

        let mut child_submission = JobSubmission::new("c", "child", "t");
        child_submission.dependencies = vec![(parent.key, DependencyKind::MustComplete)];
        let child = scheduler.submit_job(child_submission).await.unwrap();

        assert_eq!(child.status, JobStatus::Pending);
        assert!(scheduler.queue.pop_highest(child.priority_band()).await.unwrap().is_none());

        let ready = scheduler.complete_job(parent.key, None).await.unwrap();
        assert_eq!(ready, vec![child.key]);
    }

    #[tokio::test]
    async fn cycle_is_rejected_with_no_side_effects() {
        let scheduler = scheduler();
        let a = scheduler.submit_job(JobSubmission::new("a", "a", "t")).await.unwrap();
        let b = scheduler.submit_job(JobSubmission::new("b", "b", "t")).await.unwrap();
        scheduler.add_dependency(b.key, a.key, DependencyKind::MustComplete).await.unwrap();
        let verdict = scheduler.add_dependency(a.key, b.key, DependencyKind::MustComplete).await.unwrap();
        assert!(!verdict.ok);
        assert!(scheduler.dependencies.find_by_child(a.key).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn priority_inherits_from_direct_parent() {
        let scheduler = scheduler();
        let mut urgent = JobSubmission::new("p", "parent", "t");
        urgent.priority = 900;
        let parent = scheduler.submit_job(urgent).await.unwrap();
        let child = scheduler.submit_job(JobSubmission::new("c", "child", "t")).await.unwrap();
        assert_eq!(child.priority, 0);

        scheduler.add_dependency(child.key, parent.key, DependencyKind::MustComplete).await.unwrap();
        let reloaded = scheduler.jobs.find_by_key(child.key).await.unwrap().unwrap();
        assert!(reloaded.priority > 0);
    }

    #[tokio::test]
    async fn cancel_queued_job_removes_it_from_the_queue() {
        let scheduler = scheduler();
        let job = scheduler.submit_job(JobSubmission::new("j1", "first", "t")).await.unwrap();
        let verdict = scheduler.cancel_job(job.key).await.unwrap();
        assert!(verdict.ok);
        assert!(scheduler.queue.pop_highest(job.priority_band()).await.unwrap().is_none());
    }
}
