//! # taskgraph-scheduler
//!
//! The core of a distributed job scheduler: a dependency DAG, a priority
//! dispatch queue, a worker fleet manager, and a failure/retry
//! controller, wired together by a single [`Scheduler`] instance and
//! driven by [`ControlLoop`].
//!
//! ## Architecture
//!
//! ```text
//! submit_job ──► DependencyGraph (register) ──► ResourceAdmissionController
//!                                                      │
//!                                                      ▼
//!                                               PriorityQueue (band-sharded)
//!                                                      │
//!                          ControlLoop.dispatch_tick   ▼
//!                                               LoadBalancer.select_worker
//!                                                      │
//!                                                      ▼
//!                                               WorkerRegistry / bind
//!                                                      │
//!                                    complete_job ◄────┴────► fail_job
//!                                         │                      │
//!                                         ▼                      ▼
//!                               DependencyGraph.mark_completed  RetryController
//!                               (releases ready children)       (backoff / DLQ)
//! ```
//!
//! ## Key invariants
//!
//! 1. **The dependency graph never commits a cycle** — every edge is
//!    validated before commit and rolled back if it closes a cycle.
//! 2. **Lower dispatch score is more urgent** — priority band, age,
//!    overdue penalty, and retry count combine into one float per job.
//! 3. **A worker's job count never exceeds its declared capacity.**
//! 4. **Failures are either retried with backoff or quarantined to the
//!    dead-letter queue** — a job is never silently dropped.
//! 5. **This crate owns no network or storage IO** — [`repository`] and
//!    [`cache`] are traits; a real deployment backs them with a database
//!    and a cache tier.
//!
//! ## What this is not
//!
//! This is not a job *execution* engine — it decides what runs where and
//! when, never how a job's payload is interpreted or run. It does not
//! provide an API surface (REST/gRPC), persistence implementations, or a
//! UI; those are the concern of the binary that embeds this crate.

pub mod balancer;
pub mod cache;
pub mod config;
pub mod control_loop;
pub mod cron;
pub mod error;
pub mod graph;
pub mod history;
pub mod inheritance;
pub mod model;
pub mod queue;
pub mod repository;
pub mod resources;
pub mod retry;
pub mod scheduler;
pub mod workers;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{ControlLoopConfig, SchedulerConfig};
pub use control_loop::ControlLoop;
pub use error::{Result, SchedulerError, Severity, Verdict};
pub use graph::{CycleFinding, DependencyGraph};
pub use inheritance::{InheritanceStrategy, PriorityInheritance};
pub use model::{Job, JobDependency, JobStatus, PriorityBand, Worker, WorkerStatus};
pub use queue::PriorityQueue;
pub use resources::ResourceAdmissionController;
pub use retry::RetryController;
pub use scheduler::{JobSubmission, Scheduler, SchedulerBuilder};
pub use workers::WorkerRegistry;
