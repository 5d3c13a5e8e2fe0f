//! The scheduler's driving loop (spec.md §4.H, §5 "single control loop,
//! many cooperating sweeps").
//!
//! [`ControlLoop`] wraps an [`Arc<Scheduler>`] and runs the dispatch tick
//! plus the periodic sweeps (scheduled-job promotion, worker heartbeat
//! health, rebalancing, cron evaluation, stuck-job detection, cleanup) on
//! independent cadences, each as its own `tokio::spawn`'d task so a slow
//! or erroring sweep never blocks another (spec.md §7 "errors are
//! logged, not propagated, from background sweeps").

use std::sync::Arc;

use chrono::Utc;
use tracing::error;

use crate::error::Result;
use crate::model::{HistoryEventKind, JobStatus, PriorityBand};
use crate::scheduler::Scheduler;

pub struct ControlLoop {
    pub scheduler: Arc<Scheduler>,
}

impl ControlLoop {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }

    /// One dispatch tick (spec.md §4.H steps 1-4): for each band in
    /// HIGH, MEDIUM, LOW order, pop up to `max_dispatch_per_band` jobs and
    /// try to bind each to a worker. The moment a pop finds no acceptable
    /// worker, the job is pushed back to the head of its band and this
    /// band is abandoned for the tick — lower bands still get their turn.
    /// Returns the number of jobs successfully dispatched.
    pub async fn dispatch_tick(&self) -> Result<usize> {
        let mut dispatched = 0usize;
        for band in [PriorityBand::High, PriorityBand::Medium, PriorityBand::Low] {
            for _ in 0..self.scheduler.config.control_loop.max_dispatch_per_band {
                let Some(mut job) = self.scheduler.queue.pop_highest(band).await? else {
                    break;
                };

                match self.scheduler.balancer.select_worker(&job).await? {
                    Some(mut worker) => {
                        self.scheduler.balancer.bind(&mut job, &mut worker).await?;
                        dispatched += 1;
                    }
                    None => {
                        self.scheduler.queue.requeue(&mut job).await?;
                        break;
                    }
                }
            }
        }
        Ok(dispatched)
    }

    /// Promote `SCHEDULED` jobs whose `scheduled_at` has arrived into the
    /// priority queue (spec.md §4.H periodic sweep, default 30s cadence).
    pub async fn promote_scheduled_jobs(&self) -> Result<usize> {
        let now = Utc::now();
        let due = self.scheduler.jobs.find_by_status(JobStatus::Scheduled).await?;
        let mut promoted = 0;
        for mut job in due {
            if job.scheduled_at.map(|at| at <= now).unwrap_or(false) {
                job.status = JobStatus::Pending;
                self.scheduler.jobs.save(&job).await?;
                self.scheduler.admit_and_enqueue(job.key).await?;
                promoted += 1;
            }
        }
        Ok(promoted)
    }

    /// Worker heartbeat health sweep (spec.md §4.E/§4.H, default 60s
    /// cadence): run every known worker through health_check, handing
    /// `FAILED` workers to the retry controller for reassignment.
    pub async fn heartbeat_sweep(&self) -> Result<usize> {
        let now = Utc::now();
        let mut failed = 0;
        for worker in self.scheduler.worker_repo.find_all().await? {
            if matches!(self.scheduler.workers.health_check(&worker, now), crate::workers::HealthOutcome::Failed) {
                let mut worker = worker;
                self.scheduler.workers.failure_handling(&mut worker).await?;
                self.scheduler.retry.reassign_jobs_from_failed_worker(&worker.worker_id, &self.scheduler.balancer).await?;
                self.scheduler
                    .history
                    .record(
                        crate::model::ExecutionHistoryEntry::new(worker.name.clone(), HistoryEventKind::WorkerFailed, "worker failed health checks")
                            .with_worker_id(&worker.worker_id),
                    )
                    .await?;
                failed += 1;
            }
        }
        Ok(failed)
    }

    /// Remove long-dead workers from the registry (spec.md §4.E cleanup).
    pub async fn cleanup_worker_fleet(&self) -> Result<Vec<String>> {
        self.scheduler.workers.cleanup().await
    }

    /// Migrate jobs off overloaded workers onto underloaded ones (spec.md
    /// §4.F rebalance, default 60s cadence).
    pub async fn rebalance(&self) -> Result<usize> {
        Ok(self.scheduler.balancer.rebalance().await?.len())
    }

    /// Evaluate cron schedules and enqueue whatever they materialize
    /// (spec.md §4.J, default 60s cadence).
    pub async fn cron_tick(&self) -> Result<usize> {
        let scheduler = &self.scheduler;
        let fired = scheduler.cron.evaluate(Utc::now(), || scheduler.next_key());
        let count = fired.len();
        for job in fired {
            scheduler.graph.register_job(job.key).await;
            scheduler.jobs.save(&job).await?;
            scheduler.admit_and_enqueue(job.key).await?;
        }
        Ok(count)
    }

    /// Time out jobs stuck `RUNNING` past the configured threshold
    /// (spec.md §4.G, default 2h cadence).
    pub async fn stuck_job_sweep(&self) -> Result<usize> {
        self.scheduler.retry.stuck_job_sweep(Utc::now()).await
    }

    /// Trim the completed/failed queue tails, the execution history ring
    /// buffer, and TTL-expired dead-letter entries (spec.md §4.H cleanup
    /// sweep, default 1h cadence).
    pub async fn cleanup_sweep(&self) -> Result<u64> {
        let queue_removed = self.scheduler.queue.cleanup(self.scheduler.config.control_loop.cleanup_queue_max_age_hours).await?;
        let history_removed = self.scheduler.history.cleanup().await?;
        let dlq_removed = self.scheduler.retry.cleanup_dlq().await?;
        Ok(queue_removed + history_removed + dlq_removed)
    }

    /// Spawn every cadence as an independent task. Dropping (or aborting)
    /// the returned handles stops the loop; there is no shared shutdown
    /// signal because each task only ever holds its own `Arc` clone.
    pub fn spawn(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let config = self.scheduler.config.control_loop;
        vec![
            spawn_cadence(self.clone(), config.tick_interval, "dispatch_tick", |cl| async move { cl.dispatch_tick().await.map(|_| ()) }),
            spawn_cadence(self.clone(), config.scheduled_promotion_interval, "promote_scheduled_jobs", |cl| async move {
                cl.promote_scheduled_jobs().await.map(|_| ())
            }),
            spawn_cadence(self.clone(), config.heartbeat_sweep_interval, "heartbeat_sweep", |cl| async move { cl.heartbeat_sweep().await.map(|_| ()) }),
            spawn_cadence(self.clone(), config.rebalance_interval, "rebalance", |cl| async move { cl.rebalance().await.map(|_| ()) }),
            spawn_cadence(self.clone(), config.cron_interval, "cron_tick", |cl| async move { cl.cron_tick().await.map(|_| ()) }),
            spawn_cadence(self.clone(), config.stuck_job_sweep_interval, "stuck_job_sweep", |cl| async move { cl.stuck_job_sweep().await.map(|_| ()) }),
            spawn_cadence(self.clone(), config.cleanup_interval, "cleanup_sweep", |cl| async move { cl.cleanup_sweep().await.map(|_| ()) }),
        ]
    }
}

fn spawn_cadence<F, Fut>(control_loop: Arc<ControlLoop>, interval: std::time::Duration, name: &'static str, run: F) -> tokio::task::JoinHandle<()>
where
    F: Fn(Arc<ControlLoop>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = run(control_loop.clone()).await {
                error!(sweep = name, error = %e, "sweep failed, will retry next cadence");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::testing::InMemoryCache;
    use crate::model::{Worker, WorkerStatus};
    use crate::scheduler::{JobSubmission, SchedulerBuilder};
    use crate::testing::{InMemoryDependencyRepository, InMemoryHistoryRepository, InMemoryJobRepository, InMemoryWorkerRepository};

    fn control_loop() -> ControlLoop {
        let scheduler = SchedulerBuilder::new(
            Arc::new(InMemoryCache::new()),
            Arc::new(InMemoryJobRepository::new()),
            Arc::new(InMemoryDependencyRepository::new()),
            Arc::new(InMemoryWorkerRepository::new()),
            Arc::new(InMemoryHistoryRepository::new()),
        )
        .build();
        ControlLoop::new(Arc::new(scheduler))
    }

    #[tokio::test]
    async fn dispatch_tick_binds_a_pending_job_to_an_available_worker() {
        let control_loop = control_loop();
        let worker = Worker::new("w1", "w1", "host", 4);
        control_loop.scheduler.worker_repo.save(&worker).await.unwrap();

        let job = control_loop.scheduler.submit_job(JobSubmission::new("j1", "first", "t")).await.unwrap();
        let dispatched = control_loop.dispatch_tick().await.unwrap();
        assert_eq!(dispatched, 1);

        let reloaded = control_loop.scheduler.jobs.find_by_key(job.key).await.unwrap().unwrap();
        assert_eq!(reloaded.status, JobStatus::Running);
        assert!(reloaded.worker_binding.is_some());
    }

    #[tokio::test]
    async fn dispatch_tick_requeues_job_when_no_worker_accepts() {
        let control_loop = control_loop();
        control_loop.scheduler.submit_job(JobSubmission::new("j1", "first", "t")).await.unwrap();

        let dispatched = control_loop.dispatch_tick().await.unwrap();
        assert_eq!(dispatched, 0);

        // The job should still be poppable — it was pushed back, not lost.
        let popped = control_loop.scheduler.queue.pop_highest(PriorityBand::Low).await.unwrap();
        assert!(popped.is_some());
    }

    #[tokio::test]
    async fn promote_scheduled_jobs_moves_due_jobs_into_pending_and_enqueues() {
        let control_loop = control_loop();
        let mut submission = JobSubmission::new("j1", "first", "t");
        submission.scheduled_at = Some(Utc::now() - chrono::Duration::seconds(1));
        let job = control_loop.scheduler.submit_job(submission).await.unwrap();
        assert_eq!(job.status, JobStatus::Scheduled);

        let promoted = control_loop.promote_scheduled_jobs().await.unwrap();
        assert_eq!(promoted, 1);
        let popped = control_loop.scheduler.queue.pop_highest(job.priority_band()).await.unwrap();
        assert_eq!(popped.unwrap().key, job.key);
    }

    #[tokio::test]
    async fn heartbeat_sweep_reassigns_jobs_from_a_failed_worker() {
        let control_loop = control_loop();
        let mut worker = Worker::new("w1", "w1", "host", 4);
        worker.status = WorkerStatus::Error;
        worker.last_heartbeat = Utc::now() - chrono::Duration::hours(1);
        control_loop.scheduler.worker_repo.save(&worker).await.unwrap();

        // max_consecutive_failures defaults to 3: the worker only flips to
        // FAILED on the third consecutive unhealthy sweep.
        assert_eq!(control_loop.heartbeat_sweep().await.unwrap(), 0);
        assert_eq!(control_loop.heartbeat_sweep().await.unwrap(), 0);
        assert_eq!(control_loop.heartbeat_sweep().await.unwrap(), 1);
    }
}
