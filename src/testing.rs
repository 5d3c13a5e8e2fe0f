//! In-memory repository fakes for tests (spec.md §1 "repositories are
//! external collaborators this crate does not implement").
//!
//! These are reference implementations only, analogous to
//! `cache::testing::InMemoryCache` — a real deployment backs
//! [`crate::repository`]'s traits with a relational store. Gated behind
//! `test` or the `testing` feature so they never ship in a production
//! build by accident.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{DeadLetterEntry, ExecutionHistoryEntry, Job, JobDependency, JobStatus, Worker};
use crate::repository::{DependencyRepository, HistoryRepository, JobRepository, WorkerRepository};

#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: Mutex<HashMap<u64, Job>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn save(&self, job: &Job) -> Result<()> {
        self.jobs.lock().unwrap().insert(job.key, job.clone());
        Ok(())
    }

    async fn find_by_key(&self, key: u64) -> Result<Option<Job>> {
        Ok(self.jobs.lock().unwrap().get(&key).cloned())
    }

    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        Ok(self.jobs.lock().unwrap().values().filter(|j| j.status == status).cloned().collect())
    }

    async fn find_by_worker_id(&self, worker_id: &str) -> Result<Vec<Job>> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| j.worker_binding.as_ref().map(|b| b.worker_id == worker_id).unwrap_or(false))
            .cloned()
            .collect())
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<u64> {
        Ok(self.jobs.lock().unwrap().values().filter(|j| j.status == status).count() as u64)
    }

    async fn find_by_assigned_worker_and_status_in(&self, worker_id: &str, statuses: &[JobStatus]) -> Result<Vec<Job>> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| statuses.contains(&j.status) && j.worker_binding.as_ref().map(|b| b.worker_id == worker_id).unwrap_or(false))
            .cloned()
            .collect())
    }

    async fn find_by_status_and_started_before(&self, status: JobStatus, before: DateTime<Utc>) -> Result<Vec<Job>> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| j.status == status && j.started_at.map(|s| s < before).unwrap_or(false))
            .cloned()
            .collect())
    }

    async fn delete(&self, key: u64) -> Result<()> {
        self.jobs.lock().unwrap().remove(&key);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryDependencyRepository {
    edges: Mutex<Vec<JobDependency>>,
}

impl InMemoryDependencyRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DependencyRepository for InMemoryDependencyRepository {
    async fn save(&self, dependency: &JobDependency) -> Result<()> {
        self.edges.lock().unwrap().push(dependency.clone());
        Ok(())
    }

    async fn delete(&self, child_key: u64, parent_key: u64) -> Result<()> {
        self.edges.lock().unwrap().retain(|d| !(d.child_key == child_key && d.parent_key == parent_key));
        Ok(())
    }

    async fn find_by_child(&self, child_key: u64) -> Result<Vec<JobDependency>> {
        Ok(self.edges.lock().unwrap().iter().filter(|d| d.child_key == child_key).cloned().collect())
    }

    async fn find_by_parent(&self, parent_key: u64) -> Result<Vec<JobDependency>> {
        Ok(self.edges.lock().unwrap().iter().filter(|d| d.parent_key == parent_key).cloned().collect())
    }

    async fn find_all(&self) -> Result<Vec<JobDependency>> {
        Ok(self.edges.lock().unwrap().clone())
    }

    async fn find_circular_dependencies(&self) -> Result<Vec<Vec<u64>>> {
        // No storage-side cycle detector in the fake; the in-memory graph's
        // own DFS/SCC sweep is authoritative for tests.
        Ok(Vec::new())
    }
}

#[derive(Default)]
pub struct InMemoryWorkerRepository {
    workers: Mutex<HashMap<String, Worker>>,
}

impl InMemoryWorkerRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkerRepository for InMemoryWorkerRepository {
    async fn save(&self, worker: &Worker) -> Result<()> {
        self.workers.lock().unwrap().insert(worker.worker_id.clone(), worker.clone());
        Ok(())
    }

    async fn find_by_id(&self, worker_id: &str) -> Result<Option<Worker>> {
        Ok(self.workers.lock().unwrap().get(worker_id).cloned())
    }

    async fn find_all(&self) -> Result<Vec<Worker>> {
        Ok(self.workers.lock().unwrap().values().cloned().collect())
    }

    async fn find_by_last_heartbeat_before(&self, before: DateTime<Utc>) -> Result<Vec<Worker>> {
        Ok(self.workers.lock().unwrap().values().filter(|w| w.last_heartbeat < before).cloned().collect())
    }

    async fn find_potentially_dead(&self, threshold: chrono::Duration) -> Result<Vec<Worker>> {
        let cutoff = Utc::now() - threshold;
        Ok(self.workers.lock().unwrap().values().filter(|w| w.last_heartbeat < cutoff).cloned().collect())
    }

    async fn delete(&self, worker_id: &str) -> Result<()> {
        self.workers.lock().unwrap().remove(worker_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryHistoryRepository {
    entries: Mutex<Vec<ExecutionHistoryEntry>>,
    dead_letters: Mutex<HashMap<u64, DeadLetterEntry>>,
}

impl InMemoryHistoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryRepository for InMemoryHistoryRepository {
    async fn append(&self, entry: &ExecutionHistoryEntry) -> Result<()> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ExecutionHistoryEntry>> {
        let entries = self.entries.lock().unwrap();
        let start = entries.len().saturating_sub(limit);
        Ok(entries[start..].to_vec())
    }

    async fn prune_older_than(&self, retention: chrono::Duration) -> Result<u64> {
        let cutoff = Utc::now() - retention;
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|e| e.timestamp >= cutoff);
        Ok((before - entries.len()) as u64)
    }

    async fn dead_letter_put(&self, entry: &DeadLetterEntry) -> Result<()> {
        self.dead_letters.lock().unwrap().insert(entry.job_key, entry.clone());
        Ok(())
    }

    async fn dead_letter_remove(&self, job_key: u64) -> Result<Option<DeadLetterEntry>> {
        Ok(self.dead_letters.lock().unwrap().remove(&job_key))
    }

    async fn dead_letter_all(&self) -> Result<Vec<DeadLetterEntry>> {
        Ok(self.dead_letters.lock().unwrap().values().cloned().collect())
    }

    async fn dead_letter_prune_older_than(&self, retention: chrono::Duration) -> Result<u64> {
        let cutoff = Utc::now() - retention;
        let mut dead_letters = self.dead_letters.lock().unwrap();
        let before = dead_letters.len();
        dead_letters.retain(|_, e| e.created_at >= cutoff);
        Ok((before - dead_letters.len()) as u64)
    }
}
