//! Dependency edges between jobs (spec.md §3 `JobDependency`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a dependency constrains its child job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DependencyKind {
    MustComplete,
    MustStart,
    MustSucceed,
    Conditional,
    Soft,
    TimeBased,
    ResourceBased,
}

/// What happens to the child job if this dependency is never satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnFailureAction {
    Block,
    Proceed,
    Warn,
    Retry,
    Skip,
    Escalate,
}

/// A directed edge from a child job to a parent it depends on.
///
/// Invariants (enforced by [`crate::graph::DependencyGraph`], not by this
/// struct alone): no self-loops, the full edge set stays acyclic, and
/// `(child, parent)` pairs are unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDependency {
    pub child_key: u64,
    pub parent_key: u64,
    pub kind: DependencyKind,
    pub blocking: bool,
    pub satisfied: bool,
    pub satisfied_at: Option<DateTime<Utc>>,
    pub check_interval: chrono::Duration,
    pub timeout: chrono::Duration,
    pub retry_count: i32,
    pub max_retries: i32,
    pub priority_rank: i32,
    pub on_failure: OnFailureAction,
    pub validation_rule: Option<String>,
}

impl JobDependency {
    pub fn new(child_key: u64, parent_key: u64, kind: DependencyKind) -> Self {
        Self {
            child_key,
            parent_key,
            kind,
            blocking: true,
            satisfied: false,
            satisfied_at: None,
            check_interval: chrono::Duration::minutes(1),
            timeout: chrono::Duration::hours(1),
            retry_count: 0,
            max_retries: 3,
            priority_rank: 0,
            on_failure: OnFailureAction::Block,
            validation_rule: None,
        }
    }

    pub fn mark_satisfied(&mut self) {
        self.satisfied = true;
        self.satisfied_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_dependency_is_blocking_and_unsatisfied() {
        let dep = JobDependency::new(2, 1, DependencyKind::MustComplete);
        assert!(dep.blocking);
        assert!(!dep.satisfied);
        assert!(dep.satisfied_at.is_none());
    }

    #[test]
    fn mark_satisfied_stamps_time() {
        let mut dep = JobDependency::new(2, 1, DependencyKind::Soft);
        dep.mark_satisfied();
        assert!(dep.satisfied);
        assert!(dep.satisfied_at.is_some());
    }
}
