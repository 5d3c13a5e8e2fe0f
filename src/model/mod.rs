//! The data model shared by every scheduler component (spec.md §3).
//!
//! These types are plain data plus small invariant-preserving
//! constructors and mutators; the components in this crate (the
//! dependency graph, priority queue, worker registry, etc.) own the
//! transitions between states. Nothing here talks to storage or the
//! network.

pub mod dependency;
pub mod history;
pub mod job;
pub mod resource;
pub mod value;
pub mod worker;

pub use dependency::{DependencyKind, JobDependency, OnFailureAction};
pub use history::{DeadLetterEntry, ExecutionHistoryEntry, HistoryEventKind};
pub use job::{Job, JobStatus, PriorityBand, WorkerBinding};
pub use resource::ResourceConstraint;
pub use value::{Parameters, Value};
pub use worker::{Worker, WorkerStatus};
