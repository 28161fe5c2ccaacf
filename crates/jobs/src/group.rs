use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar};

use crate::task::Task;
use crate::types::{GroupStatus, Priority, TaskGroupId};

/// Completion callback of a task group, fired once with the group's handle.
pub type OnFinished = Box<dyn FnOnce(TaskGroupId) + Send + 'static>;

/// Hot-path state of one arena slot.
///
/// Shared with every queued invocation so completion bookkeeping can run
/// without the structural lock. Only the transition of a counter to zero
/// re-enters lock-guarded code.
#[derive(Debug, Default)]
pub(crate) struct GroupCounters {
    /// Advanced every time the slot's group finishes.
    generation: AtomicU32,
    /// Prerequisite groups that have not finished yet.
    active_dependencies: AtomicU32,
    /// Invocations (real or synthesized) that have not finished yet.
    remaining_invocations: AtomicU32,
    /// Set once the group's invocations have been queued.
    scheduled: AtomicBool,
    /// Signalled after the generation advances.
    pub(crate) finished: Condvar,
}

impl GroupCounters {
    pub(crate) fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn is_scheduled(&self) -> bool {
        self.scheduled.load(Ordering::Acquire)
    }

    pub(crate) fn remaining_invocations(&self) -> u32 {
        self.remaining_invocations.load(Ordering::Acquire)
    }

    pub(crate) fn active_dependencies(&self) -> u32 {
        self.active_dependencies.load(Ordering::Acquire)
    }

    /// Finished iff the slot moved past `generation`, or it ran to completion
    /// and has not been recycled yet.
    pub(crate) fn is_finished(&self, generation: u32) -> bool {
        self.generation() != generation
            || (self.is_scheduled() && self.remaining_invocations() == 0)
    }

    /// Reset for a new occupant. Called under the structural lock.
    pub(crate) fn reserve(&self) {
        self.active_dependencies.store(0, Ordering::Release);
        self.remaining_invocations.store(0, Ordering::Release);
        self.scheduled.store(false, Ordering::Release);
    }

    pub(crate) fn set_active_dependencies(&self, count: u32) {
        self.active_dependencies.store(count, Ordering::Release);
    }

    /// Returns true when this was the last outstanding dependency.
    pub(crate) fn dependency_finished(&self) -> bool {
        self.active_dependencies.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub(crate) fn mark_scheduled(&self, invocations: u32) {
        self.remaining_invocations.store(invocations, Ordering::Release);
        self.scheduled.store(true, Ordering::Release);
    }

    /// Returns true when this was the last outstanding invocation.
    pub(crate) fn invocation_finished(&self) -> bool {
        self.remaining_invocations.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Invalidate every handle of the current occupant. Called under the structural lock.
    pub(crate) fn advance_generation(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

/// Structural state of one arena slot, guarded by the scheduler lock.
pub(crate) struct GroupSlot {
    pub(crate) counters: Arc<GroupCounters>,
    pub(crate) in_use: bool,
    pub(crate) started_by_user: bool,
    pub(crate) priority: Priority,
    pub(crate) tasks: Vec<Arc<Task>>,
    pub(crate) depends_on: Vec<TaskGroupId>,
    pub(crate) dependents: Vec<TaskGroupId>,
    pub(crate) on_finished: Option<OnFinished>,
}

impl GroupSlot {
    pub(crate) fn new() -> Self {
        Self {
            counters: Arc::new(GroupCounters::default()),
            in_use: false,
            started_by_user: false,
            priority: Priority::default(),
            tasks: Vec::new(),
            depends_on: Vec::new(),
            dependents: Vec::new(),
            on_finished: None,
        }
    }

    /// Claim the slot for a new group and return its handle.
    pub(crate) fn reserve(
        &mut self,
        index: u32,
        priority: Priority,
        on_finished: Option<OnFinished>,
    ) -> TaskGroupId {
        self.in_use = true;
        self.started_by_user = false;
        self.priority = priority;
        self.tasks.clear();
        self.depends_on.clear();
        self.dependents.clear();
        self.on_finished = on_finished;
        self.counters.reserve();
        TaskGroupId {
            index,
            generation: self.counters.generation(),
        }
    }

    /// Whether `id` still refers to the group occupying this slot.
    pub(crate) fn holds(&self, id: TaskGroupId) -> bool {
        self.in_use && self.counters.generation() == id.generation
    }

    /// Hand the slot back to the arena and return the dependents to notify.
    pub(crate) fn release(&mut self) -> Vec<TaskGroupId> {
        self.counters.advance_generation();
        self.in_use = false;
        self.started_by_user = false;
        self.tasks.clear();
        self.depends_on.clear();
        self.on_finished = None;
        std::mem::take(&mut self.dependents)
    }

    pub(crate) fn status(&self, id: TaskGroupId) -> GroupStatus {
        let counters = &self.counters;
        if counters.is_finished(id.generation) {
            GroupStatus::Finished
        } else if !self.started_by_user {
            GroupStatus::Building
        } else if !counters.is_scheduled() {
            GroupStatus::Parked
        } else {
            GroupStatus::Scheduled
        }
    }
}
