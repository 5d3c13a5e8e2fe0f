//! Structured error taxonomy and verdict types for the scheduler core.
//!
//! `SchedulerError` provides pattern-matchable errors instead of generic
//! `anyhow::Error`, grouped into the failure taxonomy spec.md §7 defines:
//! Validation, CycleDetected, Transient, WorkerLost, JobExhausted, Stuck,
//! and Inconsistency. `Verdict` is the structured `{ok, message,
//! affected_ids, severity, warnings}` result every user-facing operation
//! (dependency addition, job submission, worker registration) returns
//! instead of panicking or swallowing context.

use std::fmt;

use thiserror::Error;

/// Pattern-matchable scheduler error, grouped by the recovery strategy a
/// caller should apply (spec.md §7 Propagation policy).
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Rejected without retry: bad input, not a system fault.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A dependency addition was rejected because it would create a cycle.
    #[error("dependency would create a cycle: {path}")]
    CycleDetected {
        /// Human-readable path through the cycle, e.g. `"A -> C -> B -> A"`.
        path: String,
        /// Severity score assigned by the detector that found it (spec.md §4.C).
        severity: u8,
    },

    /// Storage or cache temporarily unavailable; caller should retry with
    /// backoff, not treat this as a permanent failure.
    #[error("transient failure: {0}")]
    Transient(String),

    /// A worker was lost (missed heartbeats, explicit fault); its jobs
    /// must be reassigned, not simply failed.
    #[error("worker {worker_id} is lost")]
    WorkerLost { worker_id: String },

    /// A job exhausted its retry budget and was moved to the DLQ.
    #[error("job {job_key} exhausted retries and moved to dead-letter queue")]
    JobExhausted { job_key: u64 },

    /// A job has been `RUNNING` longer than the stuck-job threshold.
    #[error("job {job_key} is stuck (running since {since})")]
    Stuck { job_key: u64, since: String },

    /// The in-memory graph disagrees with the persisted dependency set.
    /// Logged and self-healed where possible; never panics the process.
    #[error("dependency graph inconsistency: {0}")]
    Inconsistency(String),

    /// A job or worker key referenced in an operation does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl SchedulerError {
    pub fn validation(message: impl Into<String>) -> Self {
        SchedulerError::Validation(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, SchedulerError::Transient(_))
    }
}

/// Severity of a cycle detection finding (spec.md §4.C).
///
/// Used only for reporting; callers must not infer correctness guarantees
/// from the numeric ordering beyond "higher means the detector that found
/// it considers it more certain."
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Severity(pub u8);

impl Severity {
    pub const DFS: Severity = Severity(8);
    pub const SCC: Severity = Severity(7);
    pub const STORAGE: Severity = Severity(9);
}

/// Structured outcome of a user-facing operation.
///
/// Every operation that can be rejected for a domain reason (dependency
/// addition, job submission, worker registration) returns a `Verdict`
/// rather than a bare boolean or a generic error, so callers can surface
/// the specific affected jobs and any non-fatal warnings (spec.md §4.C
/// `validateDependencyAddition`, §7 user-visible failure behavior).
#[derive(Debug, Clone)]
pub struct Verdict {
    pub ok: bool,
    pub message: String,
    pub affected_ids: Vec<u64>,
    pub severity: Option<u8>,
    pub warnings: Vec<String>,
}

impl Verdict {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            affected_ids: Vec::new(),
            severity: None,
            warnings: Vec::new(),
        }
    }

    pub fn rejected(message: impl Into<String>, severity: Option<u8>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            affected_ids: Vec::new(),
            severity,
            warnings: Vec::new(),
        }
    }

    pub fn with_affected(mut self, ids: Vec<u64>) -> Self {
        self.affected_ids = ids;
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, if self.ok { "ok" } else { "rejected" })
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_displays_message() {
        let err = SchedulerError::validation("job id required");
        assert!(err.to_string().contains("job id required"));
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(SchedulerError::Transient("timeout".into()).is_retryable());
        assert!(!SchedulerError::Validation("bad".into()).is_retryable());
        assert!(!SchedulerError::WorkerLost { worker_id: "w1".into() }.is_retryable());
    }

    #[test]
    fn verdict_builder_accumulates_warnings_and_affected() {
        let v = Verdict::ok("accepted")
            .with_affected(vec![1, 2])
            .with_warning("dependency depth exceeds 10");
        assert!(v.ok);
        assert_eq!(v.affected_ids, vec![1, 2]);
        assert_eq!(v.warnings.len(), 1);
    }

    #[test]
    fn rejected_verdict_carries_severity() {
        let v = Verdict::rejected("would create a cycle", Some(Severity::DFS.0));
        assert!(!v.ok);
        assert_eq!(v.severity, Some(8));
    }
}
