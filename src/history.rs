//! Execution history and metrics (spec.md §4.I).
//!
//! A bounded in-memory ring buffer mirrors what [`HistoryRepository`]
//! persists, giving cheap recent-activity reads without a storage round
//! trip. [`HistoryStats`] is a real aggregation over the buffer — the
//! system this was distilled from reported static zeros here, which
//! spec.md §9 flags as an open question; this crate implements the real
//! thing (see DESIGN.md).

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{DeadLetterEntry, ExecutionHistoryEntry, HistoryEventKind};
use crate::repository::HistoryRepository;

#[derive(Debug, Clone, Copy)]
pub struct HistoryConfig {
    pub max_entries: usize,
    pub retention: chrono::Duration,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_entries: 10_000, retention: chrono::Duration::days(30) }
    }
}

/// Aggregate counts over the retained window.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct HistoryStats {
    pub total: u64,
    pub job_failed: u64,
    pub moved_to_dlq: u64,
    pub worker_failed: u64,
    pub job_reassigned: u64,
    pub job_timeout: u64,
    pub job_retry: u64,
    pub job_recovered: u64,
}

impl HistoryStats {
    fn record(&mut self, kind: HistoryEventKind) {
        self.total += 1;
        match kind {
            HistoryEventKind::JobFailed => self.job_failed += 1,
            HistoryEventKind::MovedToDlq => self.moved_to_dlq += 1,
            HistoryEventKind::WorkerFailed => self.worker_failed += 1,
            HistoryEventKind::JobReassigned => self.job_reassigned += 1,
            HistoryEventKind::JobTimeout => self.job_timeout += 1,
            HistoryEventKind::JobRetry => self.job_retry += 1,
            HistoryEventKind::JobRecovered => self.job_recovered += 1,
        }
    }
}

/// Append-only ring buffer plus running counters, backed by
/// [`HistoryRepository`] for durability.
pub struct ExecutionHistory {
    repository: Arc<dyn HistoryRepository>,
    config: HistoryConfig,
    buffer: StdMutex<VecDeque<ExecutionHistoryEntry>>,
    stats: StdMutex<HistoryStats>,
}

impl ExecutionHistory {
    pub fn new(repository: Arc<dyn HistoryRepository>) -> Self {
        Self { repository, config: HistoryConfig::default(), buffer: StdMutex::new(VecDeque::new()), stats: StdMutex::new(HistoryStats::default()) }
    }

    pub fn with_config(mut self, config: HistoryConfig) -> Self {
        self.config = config;
        self
    }

    pub async fn record(&self, entry: ExecutionHistoryEntry) -> Result<()> {
        self.repository.append(&entry).await?;
        {
            let mut stats = self.stats.lock().unwrap();
            stats.record(entry.kind);
        }
        let mut buffer = self.buffer.lock().unwrap();
        buffer.push_back(entry);
        if buffer.len() > self.config.max_entries {
            buffer.pop_front();
        }
        Ok(())
    }

    /// Most recent entries held in memory, newest first.
    pub fn recent(&self, limit: usize) -> Vec<ExecutionHistoryEntry> {
        let buffer = self.buffer.lock().unwrap();
        buffer.iter().rev().take(limit).cloned().collect()
    }

    /// Aggregate counts recorded since process start (or the last
    /// [`ExecutionHistory::snapshot`] reset, if this crate's caller resets
    /// it on rollover — this implementation is cumulative).
    pub fn statistics(&self) -> HistoryStats {
        self.stats.lock().unwrap().clone()
    }

    /// Point-in-time view: counters plus the in-memory buffer's oldest and
    /// newest timestamps.
    pub fn snapshot(&self) -> HistorySnapshot {
        let buffer = self.buffer.lock().unwrap();
        HistorySnapshot {
            stats: self.stats.lock().unwrap().clone(),
            buffered_entries: buffer.len(),
            oldest: buffer.front().map(|e| e.timestamp),
            newest: buffer.back().map(|e| e.timestamp),
        }
    }

    /// Prune persisted entries older than the configured retention window
    /// (default hourly, spec.md §4.H). Dead-letter retention is separate —
    /// see [`ExecutionHistory::dead_letter_prune_older_than`].
    pub async fn cleanup(&self) -> Result<u64> {
        let pruned = self.repository.prune_older_than(self.config.retention).await?;
        let cutoff = Utc::now() - self.config.retention;
        let mut buffer = self.buffer.lock().unwrap();
        buffer.retain(|e| e.timestamp >= cutoff);
        Ok(pruned)
    }

    /// Passthroughs to the dead-letter side of [`HistoryRepository`], kept
    /// here so [`crate::retry::RetryController`] only ever talks to this
    /// wrapper and never reaches for the raw repository directly — the
    /// ring buffer and counters above would otherwise silently miss every
    /// retry/DLQ/reassignment event.
    pub async fn dead_letter_put(&self, entry: &DeadLetterEntry) -> Result<()> {
        self.repository.dead_letter_put(entry).await
    }

    pub async fn dead_letter_remove(&self, job_key: u64) -> Result<Option<DeadLetterEntry>> {
        self.repository.dead_letter_remove(job_key).await
    }

    pub async fn dead_letter_all(&self) -> Result<Vec<DeadLetterEntry>> {
        self.repository.dead_letter_all().await
    }

    /// Evict dead-letter entries past the DLQ's own TTL, independent of
    /// the bounded-FIFO size cap enforced at insertion time (spec.md §4.G
    /// "bounded FIFO with TTL").
    pub async fn dead_letter_prune_older_than(&self, retention: chrono::Duration) -> Result<u64> {
        self.repository.dead_letter_prune_older_than(retention).await
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HistorySnapshot {
    pub stats: HistoryStats,
    pub buffered_entries: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}
