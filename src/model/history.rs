//! Execution history entries and dead-letter entries (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of event recorded in the execution history ring buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryEventKind {
    JobFailed,
    MovedToDlq,
    WorkerFailed,
    JobReassigned,
    JobTimeout,
    JobRetry,
    JobRecovered,
}

/// An append-only record of something that happened to a job or worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionHistoryEntry {
    pub job_key: Option<u64>,
    pub job_name: String,
    pub worker_id: Option<String>,
    pub kind: HistoryEventKind,
    pub description: String,
    pub details: Option<String>,
    pub exception_class: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub retry_count: i32,
}

impl ExecutionHistoryEntry {
    pub fn new(job_name: impl Into<String>, kind: HistoryEventKind, description: impl Into<String>) -> Self {
        Self {
            job_key: None,
            job_name: job_name.into(),
            worker_id: None,
            kind,
            description: description.into(),
            details: None,
            exception_class: None,
            timestamp: Utc::now(),
            retry_count: 0,
        }
    }

    pub fn with_job_key(mut self, key: u64) -> Self {
        self.job_key = Some(key);
        self
    }

    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = Some(id.into());
        self
    }

    pub fn with_retry_count(mut self, count: i32) -> Self {
        self.retry_count = count;
        self
    }
}

/// A job quarantined after retries are exhausted (spec.md §3
/// `DeadLetterEntry`, §4.G DLQ semantics).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub job_key: u64,
    pub job_name: String,
    pub job_type: String,
    pub last_worker_id: Option<String>,
    pub retry_count: i32,
    pub failure_reason: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new(job_key: u64, job_name: impl Into<String>, job_type: impl Into<String>, failure_reason: impl Into<String>) -> Self {
        Self {
            job_key,
            job_name: job_name.into(),
            job_type: job_type.into(),
            last_worker_id: None,
            retry_count: 0,
            failure_reason: failure_reason.into(),
            error_message: None,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_methods_set_optional_fields() {
        let entry = ExecutionHistoryEntry::new("job-a", HistoryEventKind::JobFailed, "boom")
            .with_job_key(7)
            .with_worker_id("w1")
            .with_retry_count(2);
        assert_eq!(entry.job_key, Some(7));
        assert_eq!(entry.worker_id.as_deref(), Some("w1"));
        assert_eq!(entry.retry_count, 2);
    }
}
