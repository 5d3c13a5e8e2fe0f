//! Worker registry and health monitor (spec.md §4.E).
//!
//! Worker records persist through [`WorkerRepository`]; this module adds
//! the transient layer the spec calls for: a short-TTL cache mirror, plus
//! per-worker health state (heartbeat counter, consecutive-failure
//! counter, last-notification timestamp) that never goes to storage.
//! Registration is throttled per worker-id: three failed attempts inside
//! one hour locks out further attempts until the hour elapses.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{error, info, warn};

use crate::cache::{to_json, Cache};
use crate::error::{Result, SchedulerError, Verdict};
use crate::model::{Parameters, Worker, WorkerStatus};
use crate::repository::WorkerRepository;

fn cache_key(worker_id: &str) -> String {
    format!("worker:cache:{worker_id}")
}

/// Tunables for registration throttling, heartbeat liveness, and cleanup
/// (spec.md §6 `worker.*` configuration options).
#[derive(Debug, Clone, Copy)]
pub struct WorkerRegistryConfig {
    pub heartbeat_timeout: StdDuration,
    pub cleanup_threshold: StdDuration,
    pub auto_recovery_enabled: bool,
    pub max_consecutive_failures: u32,
    pub registration_throttle_window: StdDuration,
    pub registration_throttle_max_failures: u32,
    pub notification_throttle: StdDuration,
}

impl Default for WorkerRegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: StdDuration::from_secs(5 * 60),
            cleanup_threshold: StdDuration::from_secs(15 * 60),
            auto_recovery_enabled: true,
            max_consecutive_failures: 3,
            registration_throttle_window: StdDuration::from_secs(60 * 60),
            registration_throttle_max_failures: 3,
            notification_throttle: StdDuration::from_secs(30 * 60),
        }
    }
}

/// Registration request payload (spec.md §6 worker-facing protocol).
#[derive(Debug, Clone)]
pub struct RegisterRequest {
    pub worker_id: String,
    pub name: String,
    pub host: String,
    pub port: Option<u16>,
    pub max_concurrent_jobs: i32,
    pub capabilities: Parameters,
    pub tags: Vec<String>,
    pub version: String,
    pub priority_threshold: i32,
    pub load_factor: f64,
}

/// Heartbeat payload; every field but `worker_id` is optional — absent
/// fields are left unchanged (spec.md §4.E `heartbeat`).
#[derive(Debug, Clone, Default)]
pub struct HeartbeatPayload {
    pub status: Option<WorkerStatus>,
    pub current_job_count: Option<i32>,
    pub available_capacity: Option<i32>,
    pub cpu_usage: Option<f64>,
    pub memory_usage: Option<f64>,
    pub error_count: Option<u32>,
}

/// Outcome of a periodic [`WorkerRegistry::health_check`] (spec.md §4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthOutcome {
    Healthy,
    Unhealthy,
    Recovered,
    Failed,
}

#[derive(Default)]
struct HealthState {
    heartbeat_count: u64,
    consecutive_failures: u32,
    last_notification_sent: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct ThrottleState {
    failures: u32,
    window_started_at: Option<DateTime<Utc>>,
}

pub struct WorkerRegistry {
    cache: Arc<dyn Cache>,
    workers: Arc<dyn WorkerRepository>,
    config: WorkerRegistryConfig,
    throttle: DashMap<String, ThrottleState>,
    health: DashMap<String, HealthState>,
}

impl WorkerRegistry {
    pub fn new(cache: Arc<dyn Cache>, workers: Arc<dyn WorkerRepository>) -> Self {
        Self {
            cache,
            workers,
            config: WorkerRegistryConfig::default(),
            throttle: DashMap::new(),
            health: DashMap::new(),
        }
    }

    pub fn with_config(mut self, config: WorkerRegistryConfig) -> Self {
        self.config = config;
        self
    }

    fn is_throttled(&self, worker_id: &str) -> bool {
        match self.throttle.get(worker_id) {
            Some(state) => {
                let window_expired = state
                    .window_started_at
                    .map(|started| Utc::now() - started > chrono::Duration::from_std(self.config.registration_throttle_window).unwrap())
                    .unwrap_or(true);
                !window_expired && state.failures >= self.config.registration_throttle_max_failures
            }
            None => false,
        }
    }

    fn record_registration_failure(&self, worker_id: &str) {
        let mut state = self.throttle.entry(worker_id.to_string()).or_default();
        let window_expired = state
            .window_started_at
            .map(|started| Utc::now() - started > chrono::Duration::from_std(self.config.registration_throttle_window).unwrap())
            .unwrap_or(true);
        if window_expired {
            state.failures = 0;
            state.window_started_at = Some(Utc::now());
        }
        state.failures += 1;
    }

    fn clear_registration_throttle(&self, worker_id: &str) {
        self.throttle.remove(worker_id);
    }

    fn validate_registration(req: &RegisterRequest) -> std::result::Result<(), String> {
        if req.worker_id.trim().is_empty() {
            return Err("worker_id must not be empty".into());
        }
        if req.name.trim().is_empty() {
            return Err("name must not be empty".into());
        }
        if !(1..=100).contains(&req.max_concurrent_jobs) {
            return Err(format!("max_concurrent_jobs {} must be in [1, 100]", req.max_concurrent_jobs));
        }
        if let Some(port) = req.port {
            if port == 0 {
                return Err("port must be in [1, 65535]".into());
            }
        }
        if !(0.1..=2.0).contains(&req.load_factor) {
            return Err(format!("load_factor {} must be in [0.1, 2.0]", req.load_factor));
        }
        Ok(())
    }

    /// Register a new worker. Throttled: three rejected attempts within an
    /// hour (failed validation or storage failure both count) lock out
    /// further attempts for the worker-id until the window elapses.
    pub async fn register(&self, req: RegisterRequest) -> Result<Verdict> {
        if self.is_throttled(&req.worker_id) {
            return Err(SchedulerError::validation(format!(
                "worker {} registration throttled: too many failed attempts this hour",
                req.worker_id
            )));
        }

        if let Err(reason) = Self::validate_registration(&req) {
            self.record_registration_failure(&req.worker_id);
            return Err(SchedulerError::validation(reason));
        }

        let mut worker = Worker::new(req.worker_id.clone(), req.name, req.host, req.max_concurrent_jobs);
        worker.port = req.port;
        worker.capabilities = req.capabilities;
        worker.version = req.version;
        worker.priority_threshold = req.priority_threshold;
        worker.load_factor = req.load_factor;
        worker.status = WorkerStatus::Active;
        worker.last_heartbeat = Utc::now();

        if let Err(e) = self.workers.save(&worker).await {
            self.record_registration_failure(&req.worker_id);
            return Err(e);
        }

        let _ = self.cache.put(&cache_key(&worker.worker_id), to_json(&worker)?, Some(StdDuration::from_secs(60))).await;
        self.clear_registration_throttle(&req.worker_id);
        self.health.entry(worker.worker_id.clone()).or_default();

        info!(worker_id = %worker.worker_id, "worker registered");
        Ok(Verdict::ok(format!("worker {} registered", worker.worker_id)))
    }

    /// Ingest a heartbeat: refresh liveness, apply any supplied fields,
    /// recompute available capacity if not supplied, and mark the worker
    /// healthy.
    pub async fn heartbeat(&self, worker_id: &str, payload: HeartbeatPayload) -> Result<()> {
        let Some(mut worker) = self.workers.find_by_id(worker_id).await? else {
            return Err(SchedulerError::NotFound(format!("worker {worker_id}")));
        };

        worker.last_heartbeat = Utc::now();
        if let Some(status) = payload.status {
            worker.status = status;
        } else if worker.status == WorkerStatus::Error {
            worker.status = WorkerStatus::Active;
        }
        if let Some(count) = payload.current_job_count {
            worker.current_job_count = count;
        }
        if let Some(capacity) = payload.available_capacity {
            worker.current_job_count = (worker.max_concurrent_jobs - capacity).max(0);
        }

        self.workers.save(&worker).await?;
        let _ = self.cache.put(&cache_key(worker_id), to_json(&worker)?, Some(StdDuration::from_secs(60))).await;

        let mut state = self.health.entry(worker_id.to_string()).or_default();
        state.heartbeat_count += 1;
        Ok(())
    }

    /// Deregister a worker. Rejects if it still has assigned jobs unless
    /// `force` is set, in which case assignments are cleared.
    pub async fn deregister(&self, worker_id: &str, force: bool) -> Result<Verdict> {
        let Some(mut worker) = self.workers.find_by_id(worker_id).await? else {
            return Err(SchedulerError::NotFound(format!("worker {worker_id}")));
        };

        if worker.current_job_count > 0 && !force {
            return Ok(Verdict::rejected(format!("worker {worker_id} still has {} assigned jobs", worker.current_job_count), None));
        }

        worker.status = WorkerStatus::Inactive;
        if force {
            worker.assigned_jobs.clear();
            worker.current_job_count = 0;
        }
        self.workers.save(&worker).await?;
        let _ = self.cache.evict(&cache_key(worker_id)).await;
        self.health.remove(worker_id);

        info!(worker_id, force, "worker deregistered");
        Ok(Verdict::ok(format!("worker {worker_id} deregistered")))
    }

    /// Periodic per-worker health check (spec.md §4.E, default every 2
    /// minutes). Never mutates the worker; callers decide what to do with
    /// [`HealthOutcome::Failed`] (see [`WorkerRegistry::failure_handling`]).
    pub fn health_check(&self, worker: &Worker, now: DateTime<Utc>) -> HealthOutcome {
        let mut issues = Vec::new();
        let mut warnings = Vec::new();

        let heartbeat_age = now - worker.last_heartbeat;
        if heartbeat_age > chrono::Duration::from_std(self.config.heartbeat_timeout).unwrap() {
            issues.push("heartbeat stale");
        }

        if worker.status == WorkerStatus::Error {
            issues.push("status is ERROR");
        } else if worker.status == WorkerStatus::Inactive && worker.current_job_count > 0 {
            warnings.push("worker is INACTIVE but still has assigned jobs");
        }

        if !worker.capacity_consistent() {
            issues.push("current_job_count outside [0, max_concurrent_jobs]");
        }

        if worker.status == WorkerStatus::Active && worker.current_job_count == 0 {
            warnings.push("worker is ACTIVE with zero jobs, expected IDLE");
        }

        if !warnings.is_empty() {
            warn!(worker_id = %worker.worker_id, ?warnings, "worker health warning");
        }

        let mut state = self.health.entry(worker.worker_id.clone()).or_default();
        let was_unhealthy = state.consecutive_failures > 0;

        if issues.is_empty() {
            let outcome = if was_unhealthy { HealthOutcome::Recovered } else { HealthOutcome::Healthy };
            state.consecutive_failures = 0;
            outcome
        } else {
            state.consecutive_failures += 1;
            warn!(worker_id = %worker.worker_id, ?issues, consecutive_failures = state.consecutive_failures, "worker unhealthy");
            if state.consecutive_failures >= self.config.max_consecutive_failures {
                HealthOutcome::Failed
            } else {
                HealthOutcome::Unhealthy
            }
        }
    }

    /// Should a critical alert be sent for `worker_id` right now, given the
    /// 30-minute notification throttle? If so, records that one was sent.
    pub fn should_notify(&self, worker_id: &str) -> bool {
        let mut state = self.health.entry(worker_id.to_string()).or_default();
        let due = state
            .last_notification_sent
            .map(|last| Utc::now() - last > chrono::Duration::from_std(self.config.notification_throttle).unwrap())
            .unwrap_or(true);
        if due {
            state.last_notification_sent = Some(Utc::now());
        }
        due
    }

    /// Transition a `FAILED`-classified worker to `ERROR`, persist, evict
    /// its cache entry, and emit a critical alert if not throttled.
    pub async fn failure_handling(&self, worker: &mut Worker) -> Result<()> {
        worker.status = WorkerStatus::Error;
        self.workers.save(worker).await?;
        let _ = self.cache.evict(&cache_key(&worker.worker_id)).await;
        if self.should_notify(&worker.worker_id) {
            error!(worker_id = %worker.worker_id, "worker failed health checks, marked ERROR");
        }
        Ok(())
    }

    /// Periodic cleanup sweep (default every 15 minutes): workers whose
    /// heartbeat is older than the cleanup threshold and whose
    /// consecutive-failure count is at the configured maximum are marked
    /// `INACTIVE` with their assignment set cleared. Their jobs are
    /// released by the retry controller, not here.
    pub async fn cleanup(&self) -> Result<Vec<String>> {
        let threshold = chrono::Duration::from_std(self.config.cleanup_threshold).unwrap();
        let candidates = self.workers.find_potentially_dead(threshold).await?;
        let mut cleaned = Vec::new();
        for mut worker in candidates {
            let consecutive_failures = self.health.get(&worker.worker_id).map(|s| s.consecutive_failures).unwrap_or(0);
            if consecutive_failures < self.config.max_consecutive_failures {
                continue;
            }
            worker.status = WorkerStatus::Inactive;
            worker.assigned_jobs.clear();
            self.workers.save(&worker).await?;
            let _ = self.cache.evict(&cache_key(&worker.worker_id)).await;
            cleaned.push(worker.worker_id);
        }
        if !cleaned.is_empty() {
            info!(count = cleaned.len(), "worker cleanup sweep marked workers INACTIVE");
        }
        Ok(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::testing::InMemoryCache;
    use async_trait::async_trait;

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
        async fn find_by_last_heartbeat_before(&self, before: DateTime<Utc>) -> Result<Vec<Worker>> {
            Ok(self.workers.iter().filter(|w| w.last_heartbeat < before).map(|w| w.clone()).collect())
        }
        async fn find_potentially_dead(&self, threshold: chrono::Duration) -> Result<Vec<Worker>> {
            let cutoff = Utc::now() - threshold;
            Ok(self.workers.iter().filter(|w| w.last_heartbeat < cutoff).map(|w| w.clone()).collect())
        }
        async fn delete(&self, worker_id: &str) -> Result<()> {
            self.workers.remove(worker_id);
            Ok(())
        }
    }

    fn make_registry() -> WorkerRegistry {
        WorkerRegistry::new(Arc::new(InMemoryCache::new()), Arc::new(InMemoryWorkerRepo::default()))
    }

    fn valid_request(id: &str) -> RegisterRequest {
        RegisterRequest {
            worker_id: id.to_string(),
            name: id.to_string(),
            host: "10.0.0.1".to_string(),
            port: Some(8080),
            max_concurrent_jobs: 4,
            capabilities: Parameters::new(),
            tags: Vec::new(),
            version: "1.0".to_string(),
            priority_threshold: 0,
            load_factor: 1.0,
        }
    }

    #[tokio::test]
    async fn register_then_heartbeat_marks_active() {
        let registry = make_registry();
        registry.register(valid_request("w1")).await.unwrap();
        registry.heartbeat("w1", HeartbeatPayload::default()).await.unwrap();
    }

    #[tokio::test]
    async fn register_rejects_invalid_max_concurrent_jobs() {
        let registry = make_registry();
        let mut req = valid_request("w1");
        req.max_concurrent_jobs = 0;
        let err = registry.register(req).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));
    }

    #[tokio::test]
    async fn registration_throttles_after_three_failures() {
        let registry = make_registry();
        for _ in 0..3 {
            let mut req = valid_request("w1");
            req.max_concurrent_jobs = 0;
            let _ = registry.register(req).await;
        }
        let err = registry.register(valid_request("w1")).await.unwrap_err();
        assert!(err.to_string().contains("throttled"));
    }

    #[tokio::test]
    async fn deregister_rejects_busy_worker_without_force() {
        let registry = make_registry();
        registry.register(valid_request("w1")).await.unwrap();
        registry.heartbeat("w1", HeartbeatPayload { current_job_count: Some(2), ..Default::default() }).await.unwrap();
        let verdict = registry.deregister("w1", false).await.unwrap();
        assert!(!verdict.ok);
    }

    #[tokio::test]
    async fn deregister_with_force_clears_assignments() {
        let registry = make_registry();
        registry.register(valid_request("w1")).await.unwrap();
        registry.heartbeat("w1", HeartbeatPayload { current_job_count: Some(2), ..Default::default() }).await.unwrap();
        let verdict = registry.deregister("w1", true).await.unwrap();
        assert!(verdict.ok);
    }

    #[tokio::test]
    async fn health_check_flags_stale_heartbeat_as_unhealthy() {
        let registry = make_registry();
        let mut worker = Worker::new("w1", "w1", "h", 4);
        worker.last_heartbeat = Utc::now() - chrono::Duration::minutes(10);
        let outcome = registry.health_check(&worker, Utc::now());
        assert_eq!(outcome, HealthOutcome::Unhealthy);
    }

    #[tokio::test]
    async fn health_check_reaches_failed_after_max_consecutive_failures() {
        let registry = make_registry();
        let mut worker = Worker::new("w1", "w1", "h", 4);
        worker.last_heartbeat = Utc::now() - chrono::Duration::minutes(10);
        registry.health_check(&worker, Utc::now());
        registry.health_check(&worker, Utc::now());
        let outcome = registry.health_check(&worker, Utc::now());
        assert_eq!(outcome, HealthOutcome::Failed);
    }

    #[tokio::test]
    async fn health_check_recovers_after_heartbeat_resumes() {
        let registry = make_registry();
        let mut worker = Worker::new("w1", "w1", "h", 4);
        worker.current_job_count = 1;
        worker.last_heartbeat = Utc::now() - chrono::Duration::minutes(10);
        registry.health_check(&worker, Utc::now());
        worker.last_heartbeat = Utc::now();
        let outcome = registry.health_check(&worker, Utc::now());
        assert_eq!(outcome, HealthOutcome::Recovered);
    }
}
