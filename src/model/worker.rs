//! Worker fleet identity and state (spec.md §3 `Worker`).

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::value::Parameters;

/// Worker lifecycle states, spec.md §4.E state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    Active,
    Idle,
    Busy,
    Maintenance,
    Inactive,
    Error,
}

/// A remote worker known to the fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub worker_id: String,
    pub name: String,
    pub host: String,
    pub address: String,
    pub port: Option<u16>,
    pub max_concurrent_jobs: i32,
    pub current_job_count: i32,
    pub assigned_jobs: HashSet<u64>,
    pub status: WorkerStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub total_jobs_processed: u64,
    pub successful_jobs: u64,
    pub failed_jobs: u64,
    pub average_execution_time_ms: f64,
    pub priority_threshold: i32,
    pub load_factor: f64,
    pub capabilities: Parameters,
    pub version: String,
}

impl Worker {
    pub fn new(worker_id: impl Into<String>, name: impl Into<String>, host: impl Into<String>, max_concurrent_jobs: i32) -> Self {
        let host = host.into();
        Self {
            worker_id: worker_id.into(),
            name: name.into(),
            address: host.clone(),
            host,
            port: None,
            max_concurrent_jobs,
            current_job_count: 0,
            assigned_jobs: HashSet::new(),
            status: WorkerStatus::Active,
            last_heartbeat: Utc::now(),
            total_jobs_processed: 0,
            successful_jobs: 0,
            failed_jobs: 0,
            average_execution_time_ms: 0.0,
            priority_threshold: 0,
            load_factor: 1.0,
            capabilities: Parameters::new(),
            version: "1".to_string(),
        }
    }

    /// Derived: `max - current` (spec.md §3 capacity invariant).
    pub fn available_capacity(&self) -> i32 {
        (self.max_concurrent_jobs - self.current_job_count).max(0)
    }

    pub fn load_percentage(&self) -> f64 {
        if self.max_concurrent_jobs <= 0 {
            return 100.0;
        }
        (self.current_job_count as f64 / self.max_concurrent_jobs as f64) * 100.0
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.successful_jobs + self.failed_jobs;
        if total == 0 {
            return 100.0;
        }
        (self.successful_jobs as f64 / total as f64) * 100.0
    }

    /// 0 <= current <= max, per the capacity invariant; violations mark
    /// the worker unhealthy (checked by [`crate::workers::WorkerRegistry`]).
    pub fn capacity_consistent(&self) -> bool {
        self.current_job_count >= 0 && self.current_job_count <= self.max_concurrent_jobs
    }

    pub fn assign_job(&mut self, job_key: u64) {
        self.assigned_jobs.insert(job_key);
        self.current_job_count = self.assigned_jobs.len() as i32;
    }

    pub fn unassign_job(&mut self, job_key: u64) {
        self.assigned_jobs.remove(&job_key);
        self.current_job_count = self.assigned_jobs.len() as i32;
    }

    pub fn record_success(&mut self, execution_time_ms: f64) {
        self.total_jobs_processed += 1;
        self.successful_jobs += 1;
        self.update_average(execution_time_ms);
    }

    pub fn record_failure(&mut self, execution_time_ms: f64) {
        self.total_jobs_processed += 1;
        self.failed_jobs += 1;
        self.update_average(execution_time_ms);
    }

    fn update_average(&mut self, sample_ms: f64) {
        let n = self.total_jobs_processed as f64;
        if n <= 1.0 {
            self.average_execution_time_ms = sample_ms;
        } else {
            self.average_execution_time_ms += (sample_ms - self.average_execution_time_ms) / n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_capacity_never_negative() {
        let mut w = Worker::new("w1", "w1", "h", 2);
        w.current_job_count = 5;
        assert_eq!(w.available_capacity(), 0);
    }

    #[test]
    fn load_percentage_of_full_worker() {
        let mut w = Worker::new("w1", "w1", "h", 4);
        w.current_job_count = 2;
        assert_eq!(w.load_percentage(), 50.0);
    }

    #[test]
    fn success_rate_defaults_to_100_with_no_history() {
        let w = Worker::new("w1", "w1", "h", 4);
        assert_eq!(w.success_rate(), 100.0);
    }

    #[test]
    fn assign_and_unassign_track_current_job_count() {
        let mut w = Worker::new("w1", "w1", "h", 4);
        w.assign_job(10);
        w.assign_job(11);
        assert_eq!(w.current_job_count, 2);
        w.unassign_job(10);
        assert_eq!(w.current_job_count, 1);
    }

    #[test]
    fn capacity_consistent_flags_overcommit() {
        let mut w = Worker::new("w1", "w1", "h", 2);
        w.current_job_count = 3;
        assert!(!w.capacity_consistent());
    }

    #[test]
    fn average_execution_time_is_running_mean() {
        let mut w = Worker::new("w1", "w1", "h", 4);
        w.record_success(100.0);
        w.record_success(200.0);
        assert!((w.average_execution_time_ms - 150.0).abs() < 1e-9);
    }
}
