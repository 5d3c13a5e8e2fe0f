//! Resource admission control (spec.md §4.J).
//!
//! A job declares its resource class via `parameters["resourceType"]`, its
//! job type, or a `resource:<class>` tag ([`Job::resource_class`]). A
//! registered [`ResourceConstraint`] for that class admits the job if a
//! slot is free, or queues it in the constraint's FIFO otherwise. Jobs
//! with no resource class are always admitted — resource admission is an
//! additional gate on top of dependency readiness, not a replacement for
//! it.

use std::sync::Mutex as StdMutex;

use dashmap::DashMap;
use tracing::info;

use crate::model::{Job, ResourceConstraint};

/// Registry of named resource classes, each guarded by its own mutex
/// (spec.md §5: "a single mutex per constraint suffices; contention is
/// expected to be low").
#[derive(Default)]
pub struct ResourceAdmissionController {
    constraints: DashMap<String, StdMutex<ResourceConstraint>>,
}

impl ResourceAdmissionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_constraint(&self, name: impl Into<String>, max_concurrent: i32) {
        let name = name.into();
        self.constraints.insert(name.clone(), StdMutex::new(ResourceConstraint::new(name, max_concurrent)));
    }

    /// Attempt to admit `job`. `true` (always admitted) if the job
    /// declares no resource class, or if its class has no registered
    /// constraint. Otherwise admits if a slot is free, else queues the
    /// job key in the constraint's FIFO and returns `false`.
    pub fn try_admit(&self, job: &Job) -> bool {
        let Some(class) = job.resource_class() else {
            return true;
        };
        let Some(constraint) = self.constraints.get(&class) else {
            return true;
        };
        let admitted = constraint.lock().unwrap().try_admit(job.key);
        if !admitted {
            info!(job_key = job.key, resource_class = %class, "job queued pending resource admission");
        }
        admitted
    }

    /// Release the slot `job` held (if it declared a resource class with
    /// a registered constraint) and return the job key admitted from that
    /// constraint's FIFO, if any, for the caller to enqueue.
    pub fn release(&self, job: &Job) -> Option<u64> {
        let class = job.resource_class()?;
        let constraint = self.constraints.get(&class)?;
        constraint.lock().unwrap().release()
    }

    pub fn usage(&self, class: &str) -> Option<(i32, i32)> {
        self.constraints.get(class).map(|c| {
            let c = c.lock().unwrap();
            (c.current_usage, c.max_concurrent)
        })
    }
}
