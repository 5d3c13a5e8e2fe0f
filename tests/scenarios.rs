//! Integration coverage for the six end-to-end scenarios this scheduler
//! must satisfy (spec.md §8), exercised against the public `Scheduler` /
//! `ControlLoop` surface rather than any single component in isolation.

use std::sync::Arc;

use chrono::Utc;
use taskgraph_scheduler::cache::testing::InMemoryCache;
use taskgraph_scheduler::control_loop::ControlLoop;
use taskgraph_scheduler::model::{DependencyKind, HistoryEventKind, JobStatus, Worker, WorkerStatus};
use taskgraph_scheduler::scheduler::{JobSubmission, SchedulerBuilder};
use taskgraph_scheduler::testing::{InMemoryDependencyRepository, InMemoryHistoryRepository, InMemoryJobRepository, InMemoryWorkerRepository};

fn new_control_loop() -> ControlLoop {
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
async fn scenario_1_cycle_rejection_leaves_the_graph_unchanged() {
    let control_loop = new_control_loop();
    let scheduler = &control_loop.scheduler;

    let a = scheduler.submit_job(JobSubmission::new("a", "a", "t")).await.unwrap();
    let b = scheduler.submit_job(JobSubmission::new("b", "b", "t")).await.unwrap();
    let c = scheduler.submit_job(JobSubmission::new("c", "c", "t")).await.unwrap();

    assert!(scheduler.add_dependency(b.key, a.key, DependencyKind::MustComplete).await.unwrap().ok);
    assert!(scheduler.add_dependency(c.key, b.key, DependencyKind::MustComplete).await.unwrap().ok);

    let verdict = scheduler.add_dependency(a.key, c.key, DependencyKind::MustComplete).await.unwrap();
    assert!(!verdict.ok);
    assert!(verdict.severity.unwrap_or(0) >= 8);

    // No edge was persisted for the rejected addition.
    assert!(scheduler.dependencies.find_by_child(a.key).await.unwrap().is_empty());
}

#[tokio::test]
async fn scenario_2_completing_a_parent_releases_its_child_for_dispatch() {
    let control_loop = new_control_loop();
    let scheduler = &control_loop.scheduler;

    let a = scheduler.submit_job(JobSubmission::new("a", "a", "t")).await.unwrap();
    let b = scheduler.submit_job(JobSubmission::new("b", "b", "t")).await.unwrap();

    // B was auto-enqueued with no dependency yet; adding one now pulls it
    // back to PENDING until A completes. A is popped (dispatched) so it
    // can legitimately be completed afterward.
    assert!(scheduler.add_dependency(b.key, a.key, DependencyKind::MustComplete).await.unwrap().ok);
    assert!(scheduler.queue.pop_highest(b.priority_band()).await.unwrap().is_none());
    scheduler.queue.pop_highest(a.priority_band()).await.unwrap();

    let released = scheduler.complete_job(a.key, None).await.unwrap();
    assert_eq!(released, vec![b.key]);

    let worker = Worker::new("w1", "w1", "host", 1);
    scheduler.worker_repo.save(&worker).await.unwrap();
    let dispatched = control_loop.dispatch_tick().await.unwrap();
    assert_eq!(dispatched, 1);
}

#[tokio::test]
async fn scenario_3_exhausted_retries_move_a_job_to_the_dead_letter_queue() {
    let control_loop = new_control_loop();
    let scheduler = &control_loop.scheduler;

    let mut submission = JobSubmission::new("j", "flaky", "t");
    submission.max_retries = 2;
    let job = scheduler.submit_job(submission).await.unwrap();

    scheduler.fail_job(job.key, "boom 1").await.unwrap();
    scheduler.fail_job(job.key, "boom 2").await.unwrap();
    scheduler.fail_job(job.key, "boom 3").await.unwrap();

    let dead_letters = scheduler.history.recent(100);
    let failures = dead_letters.iter().filter(|e| e.kind == HistoryEventKind::JobFailed).count();
    let moved_to_dlq = dead_letters.iter().filter(|e| e.kind == HistoryEventKind::MovedToDlq).count();
    assert_eq!(failures, 3);
    assert_eq!(moved_to_dlq, 1);
}

#[tokio::test]
async fn scenario_4_a_lost_workers_running_job_is_reassigned() {
    let control_loop = new_control_loop();
    let scheduler = &control_loop.scheduler;

    let w1 = Worker::new("w1", "w1", "host", 2);
    let w2 = Worker::new("w2", "w2", "host", 2);
    scheduler.worker_repo.save(&w1).await.unwrap();
    scheduler.worker_repo.save(&w2).await.unwrap();

    let job = scheduler.submit_job(JobSubmission::new("j", "first", "t")).await.unwrap();
    assert_eq!(control_loop.dispatch_tick().await.unwrap(), 1);
    let running = scheduler.jobs.find_by_key(job.key).await.unwrap().unwrap();
    let bound_to = running.worker_binding.clone().unwrap().worker_id;

    // Age the bound worker's heartbeat past the 5-minute timeout and mark
    // it errored so it fails three consecutive health checks.
    let mut lost_worker = scheduler.worker_repo.find_by_id(&bound_to).await.unwrap().unwrap();
    lost_worker.last_heartbeat = Utc::now() - chrono::Duration::minutes(10);
    lost_worker.status = WorkerStatus::Error;
    scheduler.worker_repo.save(&lost_worker).await.unwrap();

    control_loop.heartbeat_sweep().await.unwrap();
    control_loop.heartbeat_sweep().await.unwrap();
    control_loop.heartbeat_sweep().await.unwrap();

    let reassigned = scheduler.history.recent(100).into_iter().filter(|e| e.kind == HistoryEventKind::JobReassigned).count();
    assert_eq!(reassigned, 1);

    let reloaded = scheduler.jobs.find_by_key(job.key).await.unwrap().unwrap();
    assert_eq!(reloaded.status, JobStatus::Running);
    assert_ne!(reloaded.worker_binding.unwrap().worker_id, bound_to);
}

#[tokio::test]
async fn scenario_5_popping_the_queue_favors_the_lower_scoring_job() {
    let control_loop = new_control_loop();
    let scheduler = &control_loop.scheduler;

    let mut x = JobSubmission::new("x", "x", "t");
    x.priority = 1000;
    let mut y = JobSubmission::new("y", "y", "t");
    y.priority = 1000;

    let x = scheduler.submit_job(x).await.unwrap();
    let y = scheduler.submit_job(y).await.unwrap();

    // Simulate job Y having already failed once before this tick.
    let mut y_job = scheduler.jobs.find_by_key(y.key).await.unwrap().unwrap();
    y_job.retry_count = 1;
    scheduler.queue.update_priority(&y_job).await.unwrap();
    scheduler.jobs.save(&y_job).await.unwrap();

    let popped = scheduler.queue.pop_highest(x.priority_band()).await.unwrap().unwrap();
    assert_eq!(popped.key, x.key);
}

#[tokio::test]
async fn scenario_6_a_resource_constraint_admits_the_fifo_head_on_release() {
    let control_loop = new_control_loop();
    let scheduler = &control_loop.scheduler;
    scheduler.resources.register_constraint("gpu", 2);

    let mut g1 = JobSubmission::new("g1", "g1", "t");
    g1.tags = vec!["resource:gpu".to_string()];
    let mut g2 = JobSubmission::new("g2", "g2", "t");
    g2.tags = vec!["resource:gpu".to_string()];
    let mut g3 = JobSubmission::new("g3", "g3", "t");
    g3.tags = vec!["resource:gpu".to_string()];

    let g1 = scheduler.submit_job(g1).await.unwrap();
    scheduler.submit_job(g2).await.unwrap();
    let g3 = scheduler.submit_job(g3).await.unwrap();

    // G1, G2 admitted and queued; G3 parked in the constraint's FIFO.
    assert!(scheduler.queue.pop_highest(g1.priority_band()).await.unwrap().is_some());
    let g3_reloaded = scheduler.jobs.find_by_key(g3.key).await.unwrap().unwrap();
    assert_eq!(g3_reloaded.status, JobStatus::Pending);

    let released = scheduler.complete_job(g1.key, None).await.unwrap();
    assert_eq!(released, vec![g3.key]);

    let g3_after = scheduler.jobs.find_by_key(g3.key).await.unwrap().unwrap();
    assert_eq!(g3_after.status, JobStatus::Queued);
}
