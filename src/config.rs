//! Aggregated configuration (spec.md §6).
//!
//! Every tunable named in spec.md §6 lives on [`SchedulerConfig`] as one
//! of the per-component config structs already defined alongside their
//! owning module (`QueueCapacities`, `WorkerRegistryConfig`,
//! `RetryConfig`, `RebalanceThresholds`, `HistoryConfig`), plus the
//! knobs that don't belong to any single component (dispatch cadence,
//! load-balancing strategy, audit retention). Defaults match spec.md §6
//! exactly; nothing here reads environment variables or files — that
//! wiring belongs to the binary embedding this crate, which is out of
//! scope (spec.md §1).

use std::time::Duration;

use crate::balancer::{LoadBalancingStrategy, RebalanceThresholds};
use crate::history::HistoryConfig;
use crate::queue::QueueCapacities;
use crate::retry::RetryConfig;
use crate::workers::WorkerRegistryConfig;

/// Scheduler control loop cadence (spec.md §4.H, §6).
#[derive(Debug, Clone, Copy)]
pub struct ControlLoopConfig {
    /// Dispatch tick cadence (default 5s).
    pub tick_interval: Duration,
    /// Max jobs popped per priority band per tick (default 50).
    pub max_dispatch_per_band: usize,
    /// Scheduled-job promotion sweep cadence (default 30s).
    pub scheduled_promotion_interval: Duration,
    /// Worker heartbeat sweep cadence (default 60s).
    pub heartbeat_sweep_interval: Duration,
    /// Fleet rebalance cadence (default 60s).
    pub rebalance_interval: Duration,
    /// Cron trigger evaluation cadence (default 60s).
    pub cron_interval: Duration,
    /// Stuck-job sweep cadence (default 2h).
    pub stuck_job_sweep_interval: Duration,
    /// Cleanup sweep cadence (default 1h): completed/failed queue tails
    /// older than 24h, execution history older than 30 days.
    pub cleanup_interval: Duration,
    pub cleanup_queue_max_age_hours: i64,
}

impl Default for ControlLoopConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            max_dispatch_per_band: 50,
            scheduled_promotion_interval: Duration::from_secs(30),
            heartbeat_sweep_interval: Duration::from_secs(60),
            rebalance_interval: Duration::from_secs(60),
            cron_interval: Duration::from_secs(60),
            stuck_job_sweep_interval: Duration::from_secs(2 * 60 * 60),
            cleanup_interval: Duration::from_secs(60 * 60),
            cleanup_queue_max_age_hours: 24,
        }
    }
}

/// Every config knob spec.md §6 recognizes, grouped by the component it
/// governs.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub load_balancing_strategy: LoadBalancingStrategy,
    pub rebalance: RebalanceThresholds,
    pub queue_capacities: QueueCapacities,
    pub retry: RetryConfig,
    pub worker_registry: WorkerRegistryConfig,
    pub history: HistoryConfig,
    pub control_loop: ControlLoopConfig,
    /// Max dependency chain depth priority inheritance will climb
    /// (spec.md §4.J, default 5).
    pub priority_inheritance_max_depth: usize,
    /// Per-level decay applied by `WEIGHTED_AVERAGE`/`PROPAGATION`
    /// inheritance strategies (spec.md §4.J).
    pub priority_inheritance_decay: f64,
    /// `audit.logging.retention.days` (spec.md §6) — retained for parity
    /// with the audit-log sink's configuration surface; the sink itself
    /// is an external collaborator (spec.md §1) this crate does not own.
    pub audit_retention_days: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self {
            load_balancing_strategy: LoadBalancingStrategy::default(),
            rebalance: RebalanceThresholds::default(),
            queue_capacities: QueueCapacities::default(),
            retry: RetryConfig::default(),
            worker_registry: WorkerRegistryConfig::default(),
            history: HistoryConfig::default(),
            control_loop: ControlLoopConfig::default(),
            priority_inheritance_max_depth: 5,
            priority_inheritance_decay: 0.8,
            audit_retention_days: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let config = SchedulerConfig::new();
        assert_eq!(config.control_loop.tick_interval, Duration::from_secs(5));
        assert_eq!(config.control_loop.max_dispatch_per_band, 50);
        assert_eq!(config.queue_capacities.high, 1_000);
        assert_eq!(config.retry.base_delay, Duration::from_secs(5));
        assert_eq!(config.priority_inheritance_max_depth, 5);
    }
}
