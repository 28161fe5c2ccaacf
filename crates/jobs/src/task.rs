use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::types::TaskGroupId;

/// The work a [`Task`] runs, once per invocation.
///
/// `invocation` is in `0..max(1, multiplicity)`; invocations of one task may
/// run in parallel on different threads.
pub trait Job: Send + Sync {
    fn execute(&self, invocation: u32);
}

impl<F> Job for F
where
    F: Fn(u32) + Send + Sync,
{
    fn execute(&self, invocation: u32) {
        self(invocation)
    }
}

/// Whether a task may wait on other work while it runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TaskNesting {
    /// The task may call `wait_for_group` / `wait_for_condition`.
    #[default]
    Maybe,
    /// The task must never wait; a blocking wait from inside it panics.
    Never,
}

/// A named unit of work with a multiplicity.
///
/// Tasks are shared as `Arc<Task>` and referenced by at most one group at a
/// time. A task can be reused for a new group once its previous run finished.
pub struct Task {
    name: String,
    multiplicity: u32,
    nesting: TaskNesting,
    job: Box<dyn Job>,
    remaining_runs: AtomicU32,
    scheduled: AtomicBool,
    cancel_requested: AtomicBool,
    owner: Mutex<Option<TaskGroupId>>,
}

impl Task {
    /// Create a task with multiplicity 1.
    pub fn new(name: impl Into<String>, job: impl Job + 'static) -> Self {
        Self {
            name: name.into(),
            multiplicity: 1,
            nesting: TaskNesting::Maybe,
            job: Box::new(job),
            remaining_runs: AtomicU32::new(0),
            scheduled: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            owner: Mutex::new(None),
        }
    }

    /// Create a task from a closure receiving the invocation index.
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        Self::new(name, f)
    }

    /// Run the job this many times in parallel. 0 behaves like 1.
    pub fn with_multiplicity(mut self, multiplicity: u32) -> Self {
        self.multiplicity = multiplicity;
        self
    }

    pub fn with_nesting(mut self, nesting: TaskNesting) -> Self {
        self.nesting = nesting;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn multiplicity(&self) -> u32 {
        self.multiplicity
    }

    pub fn nesting(&self) -> TaskNesting {
        self.nesting
    }

    /// Invocations one run of this task expands to.
    pub fn runs(&self) -> u32 {
        self.multiplicity.max(1)
    }

    /// Invocations of the current run that have not finished yet.
    pub fn remaining_runs(&self) -> u32 {
        self.remaining_runs.load(Ordering::Acquire)
    }

    /// True once every invocation of the current run has finished (or the
    /// task was never added to a group).
    pub fn is_finished(&self) -> bool {
        self.remaining_runs() == 0
    }

    /// Whether the owning group has pushed this task's invocations to the queue.
    pub fn is_scheduled(&self) -> bool {
        self.scheduled.load(Ordering::Acquire)
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    /// Group the task was last added to.
    pub fn owner(&self) -> Option<TaskGroupId> {
        *self.owner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::Release);
    }

    /// Prepare the task for a run inside `group`.
    pub(crate) fn reset(&self, group: TaskGroupId) {
        self.remaining_runs.store(self.runs(), Ordering::Release);
        self.scheduled.store(false, Ordering::Release);
        self.cancel_requested.store(false, Ordering::Release);
        *self.owner.lock().unwrap_or_else(PoisonError::into_inner) = Some(group);
    }

    pub(crate) fn mark_scheduled(&self) {
        self.remaining_runs.store(self.runs(), Ordering::Release);
        self.scheduled.store(true, Ordering::Release);
    }

    /// The task was removed before any invocation was queued.
    pub(crate) fn mark_dropped(&self) {
        self.remaining_runs.store(0, Ordering::Release);
    }

    /// Returns the number of invocations still outstanding.
    pub(crate) fn invocation_finished(&self) -> u32 {
        self.remaining_runs.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub(crate) fn execute(&self, invocation: u32) {
        self.job.execute(invocation);
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("multiplicity", &self.multiplicity)
            .field("nesting", &self.nesting)
            .field("remaining_runs", &self.remaining_runs())
            .field("scheduled", &self.is_scheduled())
            .finish()
    }
}
