//! Assignment and load balancer (spec.md §4.F).
//!
//! Selects a (job, worker) pair under one of seven configurable
//! strategies, binds them as a unit (rolling back both sides on partial
//! failure), and runs a periodic fleet-rebalancing sweep that migrates
//! low-priority work off overloaded workers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::cache::Cache;
use crate::error::{Result, SchedulerError};
use crate::model::{Job, JobStatus, Worker, WorkerBinding, WorkerStatus};
use crate::repository::{JobRepository, WorkerRepository};

/// High-priority admission threshold (spec.md §4.F), shared with the
/// priority-band boundary used by the queue.
const HIGH_PRIORITY_THRESHOLD: i32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBalancingStrategy {
    RoundRobin,
    LeastConnections,
    WeightedRoundRobin,
    LeastResponseTime,
    ResourceBased,
    Intelligent,
    Adaptive,
}

impl Default for LoadBalancingStrategy {
    fn default() -> Self {
        LoadBalancingStrategy::Intelligent
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RebalanceThresholds {
    pub overloaded_pct: f64,
    pub underloaded_pct: f64,
    pub max_migrations_per_source: usize,
}

impl Default for RebalanceThresholds {
    fn default() -> Self {
        Self { overloaded_pct: 85.0, underloaded_pct: 65.0, max_migrations_per_source: 5 }
    }
}

/// `worker.available > 0`; `job.priority >= worker.priority_threshold`;
/// high-priority jobs (>=500) additionally require `success_rate >= 85%`;
/// `worker.load_percentage <= 95%` (spec.md §4.F).
pub fn can_worker_handle(worker: &Worker, job: &Job) -> bool {
    if worker.available_capacity() <= 0 {
        return false;
    }
    if job.priority < worker.priority_threshold {
        return false;
    }
    if job.priority >= HIGH_PRIORITY_THRESHOLD && worker.success_rate() < 85.0 {
        return false;
    }
    worker.load_percentage() <= 95.0
}

fn response_time_score(worker: &Worker) -> f64 {
    let seconds = worker.average_execution_time_ms / 1000.0;
    if seconds <= 1.0 {
        1.0
    } else if seconds <= 5.0 {
        0.8
    } else if seconds <= 10.0 {
        0.6
    } else if seconds <= 30.0 {
        0.4
    } else {
        0.2
    }
}

fn capacity_fraction(worker: &Worker) -> f64 {
    if worker.max_concurrent_jobs <= 0 {
        return 0.0;
    }
    worker.available_capacity() as f64 / worker.max_concurrent_jobs as f64
}

fn load_fraction(worker: &Worker) -> f64 {
    worker.load_percentage() / 100.0
}

fn resource_based_score(worker: &Worker) -> f64 {
    0.4 * capacity_fraction(worker) + 0.3 * (1.0 - load_fraction(worker)) + 0.3 * (worker.success_rate() / 100.0)
}

fn intelligent_score(worker: &Worker, job: &Job) -> f64 {
    let base = 0.25 * (capacity_fraction(worker) + (1.0 - load_fraction(worker)) + worker.success_rate() / 100.0 + response_time_score(worker));
    let bonus = if job.priority >= HIGH_PRIORITY_THRESHOLD && worker.success_rate() >= 85.0 { 1.3 } else { 1.1 };
    base * bonus
}

pub struct LoadBalancer {
    cache: Arc<dyn Cache>,
    workers: Arc<dyn WorkerRepository>,
    jobs: Arc<dyn JobRepository>,
    strategy: LoadBalancingStrategy,
    rebalance: RebalanceThresholds,
    round_robin: AtomicU64,
    high_priority_round_robin: AtomicU64,
}

impl LoadBalancer {
    pub fn new(cache: Arc<dyn Cache>, workers: Arc<dyn WorkerRepository>, jobs: Arc<dyn JobRepository>) -> Self {
        Self {
            cache,
            workers,
            jobs,
            strategy: LoadBalancingStrategy::default(),
            rebalance: RebalanceThresholds::default(),
            round_robin: AtomicU64::new(0),
            high_priority_round_robin: AtomicU64::new(0),
        }
    }

    pub fn with_strategy(mut self, strategy: LoadBalancingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_rebalance_thresholds(mut self, thresholds: RebalanceThresholds) -> Self {
        self.rebalance = thresholds;
        self
    }

    async fn is_blacklisted(&self, worker_id: &str) -> Result<bool> {
        Ok(self.cache.get(&format!("worker:blacklist:{worker_id}")).await?.is_some())
    }

    /// Workers in `ACTIVE` state, not blacklisted, with room to spare,
    /// sorted by ascending load.
    pub async fn candidates(&self) -> Result<Vec<Worker>> {
        let mut candidates = Vec::new();
        for worker in self.workers.find_all().await? {
            if worker.status != WorkerStatus::Active {
                continue;
            }
            if worker.load_percentage() >= 100.0 || worker.available_capacity() <= 0 {
                continue;
            }
            if self.is_blacklisted(&worker.worker_id).await? {
                continue;
            }
            candidates.push(worker);
        }
        candidates.sort_by(|a, b| a.load_percentage().partial_cmp(&b.load_percentage()).unwrap());
        Ok(candidates)
    }

    /// Select a worker for `job` according to the configured strategy.
    /// `None` if no candidate is admissible.
    pub async fn select_worker(&self, job: &Job) -> Result<Option<Worker>> {
        let candidates = self.candidates().await?;
        let admissible: Vec<Worker> = candidates.into_iter().filter(|w| can_worker_handle(w, job)).collect();
        if admissible.is_empty() {
            return Ok(None);
        }
        Ok(self.pick(&admissible, job))
    }

    fn pick(&self, admissible: &[Worker], job: &Job) -> Option<Worker> {
        self.pick_with(self.strategy, admissible, job)
    }

    /// Dispatch on an explicitly passed strategy rather than `self.strategy`
    /// — used by [`Self::pick_adaptive`] to delegate to a concrete strategy
    /// without re-entering the `Adaptive` branch.
    fn pick_with(&self, strategy: LoadBalancingStrategy, admissible: &[Worker], job: &Job) -> Option<Worker> {
        match strategy {
            LoadBalancingStrategy::RoundRobin => self.pick_round_robin(admissible, job),
            LoadBalancingStrategy::LeastConnections => admissible.iter().min_by_key(|w| w.current_job_count).cloned(),
            LoadBalancingStrategy::WeightedRoundRobin => self.pick_weighted(admissible),
            LoadBalancingStrategy::LeastResponseTime => admissible
                .iter()
                .min_by(|a, b| a.average_execution_time_ms.partial_cmp(&b.average_execution_time_ms).unwrap())
                .cloned(),
            LoadBalancingStrategy::ResourceBased => {
                admissible.iter().max_by(|a, b| resource_based_score(a).partial_cmp(&resource_based_score(b)).unwrap()).cloned()
            }
            LoadBalancingStrategy::Intelligent => admissible
                .iter()
                .max_by(|a, b| intelligent_score(a, job).partial_cmp(&intelligent_score(b, job)).unwrap())
                .cloned(),
            LoadBalancingStrategy::Adaptive => self.pick_adaptive(admissible, job),
        }
    }

    fn pick_round_robin(&self, admissible: &[Worker], job: &Job) -> Option<Worker> {
        if job.priority >= HIGH_PRIORITY_THRESHOLD {
            let eligible: Vec<&Worker> = admissible.iter().filter(|w| w.max_concurrent_jobs >= 5).collect();
            if !eligible.is_empty() {
                let i = self.high_priority_round_robin.fetch_add(1, Ordering::Relaxed) as usize % eligible.len();
                return Some(eligible[i].clone());
            }
        }
        let i = self.round_robin.fetch_add(1, Ordering::Relaxed) as usize % admissible.len();
        Some(admissible[i].clone())
    }

    fn pick_weighted(&self, admissible: &[Worker]) -> Option<Worker> {
        let weights: Vec<f64> = admissible
            .iter()
            .map(|w| if w.max_concurrent_jobs > 0 { w.available_capacity() as f64 / w.max_concurrent_jobs as f64 } else { 0.0 })
            .collect();
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return admissible.first().cloned();
        }
        let mut roll = fastrand::f64() * total;
        for (worker, weight) in admissible.iter().zip(weights.iter()) {
            if roll < *weight {
                return Some(worker.clone());
            }
            roll -= weight;
        }
        admissible.last().cloned()
    }

    fn pick_adaptive(&self, admissible: &[Worker], job: &Job) -> Option<Worker> {
        let mean_load = admissible.iter().map(|w| w.load_percentage()).sum::<f64>() / admissible.len() as f64;
        let delegate = if mean_load < 50.0 {
            LoadBalancingStrategy::LeastResponseTime
        } else if mean_load < 80.0 {
            LoadBalancingStrategy::Intelligent
        } else {
            LoadBalancingStrategy::LeastConnections
        };
        self.pick_with(delegate, admissible, job).or_else(|| admissible.first().cloned())
    }

    /// Bind `job` to `worker` as a pair. A failure of either persistence
    /// call rolls back both sides.
    pub async fn bind(&self, job: &mut Job, worker: &mut Worker) -> Result<()> {
        let binding = WorkerBinding {
            worker_id: worker.worker_id.clone(),
            worker_name: worker.name.clone(),
            host: worker.host.clone(),
            port: worker.port,
            assigned_at: Utc::now(),
        };

        job.bind_worker(binding);
        worker.assign_job(job.key);

        if let Err(e) = self.jobs.save(job).await {
            worker.unassign_job(job.key);
            return Err(e);
        }
        if let Err(e) = self.workers.save(worker).await {
            worker.unassign_job(job.key);
            job.worker_binding = None;
            let _ = self.jobs.save(job).await;
            return Err(e);
        }

        info!(job_key = job.key, worker_id = %worker.worker_id, "job bound to worker");
        Ok(())
    }

    /// Fleet rebalancing sweep (spec.md §4.F, default every 60s): moves up
    /// to `max_migrations_per_source` low-priority pending/queued jobs off
    /// each overloaded worker onto the least-loaded underloaded worker.
    /// Returns the `(job_key, from_worker, to_worker)` triples migrated.
    pub async fn rebalance(&self) -> Result<Vec<(u64, String, String)>> {
        let fleet = self.workers.find_all().await?;
        let mut overloaded: Vec<Worker> = fleet.iter().filter(|w| w.load_percentage() > self.rebalance.overloaded_pct).cloned().collect();
        let mut underloaded: Vec<Worker> = fleet.iter().filter(|w| w.load_percentage() < self.rebalance.underloaded_pct).cloned().collect();

        let mut migrations = Vec::new();

        for source in overloaded.iter_mut() {
            let migratable = self
                .jobs
                .find_by_assigned_worker_and_status_in(&source.worker_id, &[JobStatus::Pending, JobStatus::Queued])
                .await?;
            let mut moved = 0usize;
            for mut job in migratable.into_iter().filter(|j| j.priority < HIGH_PRIORITY_THRESHOLD) {
                if moved >= self.rebalance.max_migrations_per_source || source.load_percentage() <= self.rebalance.underloaded_pct {
                    break;
                }
                underloaded.sort_by(|a, b| a.load_percentage().partial_cmp(&b.load_percentage()).unwrap());
                let Some(target) = underloaded.first_mut() else {
                    break;
                };

                source.unassign_job(job.key);
                target.assign_job(job.key);
                job.worker_binding = job.worker_binding.map(|mut b| {
                    b.worker_id = target.worker_id.clone();
                    b.worker_name = target.name.clone();
                    b.host = target.host.clone();
                    b.port = target.port;
                    b
                });

                if let Err(e) = self.jobs.save(&job).await {
                    warn!(job_key = job.key, error = %e, "rebalance: failed to persist migrated job");
                    source.assign_job(job.key);
                    target.unassign_job(job.key);
                    continue;
                }
                self.workers.save(source).await?;
                self.workers.save(target).await?;

                migrations.push((job.key, source.worker_id.clone(), target.worker_id.clone()));
                moved += 1;
            }
        }

        if !migrations.is_empty() {
            info!(count = migrations.len(), "fleet rebalance migrated jobs");
        }
        Ok(migrations)
    }
}
