use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, trace, warn};

use crate::group::{GroupCounters, GroupSlot, OnFinished};
use crate::queue::Invocation;
use crate::task::Task;
use crate::types::{Priority, TaskGroupId};

use super::Scheduler;

impl Scheduler {
    // ── Building groups ─────────────────────────────────────────────

    /// Create an empty group. It runs nothing until [`start_task_group`]
    /// is called.
    ///
    /// [`start_task_group`]: Scheduler::start_task_group
    pub fn create_task_group(&self, priority: Priority) -> TaskGroupId {
        self.reserve_group(priority, None)
    }

    /// Create an empty group whose completion fires `on_finished` exactly once.
    ///
    /// The callback runs on the thread that finished the group's last
    /// invocation, before dependents are released.
    pub fn create_task_group_with_callback(
        &self,
        priority: Priority,
        on_finished: impl FnOnce(TaskGroupId) + Send + 'static,
    ) -> TaskGroupId {
        self.reserve_group(priority, Some(Box::new(on_finished)))
    }

    fn reserve_group(&self, priority: Priority, on_finished: Option<OnFinished>) -> TaskGroupId {
        let id = {
            let mut state = self.lock_state();
            let index = match state.slots.iter().position(|slot| !slot.in_use) {
                Some(index) => index,
                None => {
                    state.slots.push(GroupSlot::new());
                    state.slots.len() - 1
                }
            };
            state.slots[index].reserve(index as u32, priority, on_finished)
        };
        self.record(|m| m.groups_created += 1);
        trace!(group = %id, ?priority, "task group created");
        id
    }

    /// Add a task to a group that has not been started.
    ///
    /// # Panics
    ///
    /// If the task has no name, is still running in another group, or the
    /// group is stale or already started.
    pub fn add_task_to_group(&self, group: TaskGroupId, task: Arc<Task>) {
        assert!(!task.name().is_empty(), "tasks added to {group} must be named");
        assert!(
            task.is_finished(),
            "task '{}' is still running and cannot be added to {group}",
            task.name()
        );

        let mut state = self.lock_state();
        let Some(slot) = state.live_slot_mut(group) else {
            panic!("cannot add task '{}' to {group}: the handle is stale", task.name());
        };
        assert!(
            !slot.started_by_user,
            "cannot add task '{}' to {group}: the group was already started",
            task.name()
        );
        task.reset(group);
        slot.tasks.push(task);
    }

    /// Make `group` wait for `depends_on` to finish before it is scheduled.
    ///
    /// Dependencies must be declared before `group` is started. A stale
    /// `depends_on` counts as already finished. Cycles through more than one
    /// group are not detected and never resolve.
    ///
    /// # Panics
    ///
    /// If a group is made to depend on itself, or `group` is stale.
    pub fn add_task_group_dependency(&self, group: TaskGroupId, depends_on: TaskGroupId) {
        assert_ne!(group, depends_on, "{group} cannot depend on itself");

        let mut state = self.lock_state();
        let Some(slot) = state.live_slot_mut(group) else {
            panic!("cannot add a dependency to {group}: the handle is stale");
        };
        if slot.started_by_user {
            warn!(
                group = %group,
                depends_on = %depends_on,
                "dependency added after start is ignored"
            );
            return;
        }
        slot.depends_on.push(depends_on);
    }

    /// Batch form of [`add_task_group_dependency`](Scheduler::add_task_group_dependency).
    pub fn add_task_group_dependencies(&self, group: TaskGroupId, depends_on: &[TaskGroupId]) {
        for &prerequisite in depends_on {
            self.add_task_group_dependency(group, prerequisite);
        }
    }

    /// Hand the group to the scheduler. It is queued right away if every
    /// prerequisite already finished, otherwise it is parked until the last
    /// one does.
    ///
    /// # Panics
    ///
    /// If the group is stale or was already started.
    pub fn start_task_group(&self, group: TaskGroupId) {
        let active = {
            let mut state = self.lock_state();
            let Some(slot) = state.live_slot_mut(group) else {
                panic!("cannot start {group}: the handle is stale");
            };
            assert!(!slot.started_by_user, "{group} was already started");
            slot.started_by_user = true;
            let prerequisites = slot.depends_on.clone();

            let mut active = 0u32;
            for prerequisite in prerequisites {
                // A prerequisite still in its finish sequence is live until
                // released, and releasing it notifies this group.
                if let Some(dep) = state.live_slot_mut(prerequisite) {
                    dep.dependents.push(group);
                    active += 1;
                }
            }
            if let Some(slot) = state.live_slot(group) {
                slot.counters.set_active_dependencies(active);
            }
            active
        };

        if active == 0 {
            self.schedule_group_tasks(group, false);
        } else {
            debug!(group = %group, prerequisites = active, "task group parked");
        }
    }

    /// Create, fill and start a single-task group in one call.
    pub fn start_single_task(
        &self,
        task: Arc<Task>,
        priority: Priority,
        depends_on: Option<TaskGroupId>,
        on_finished: Option<OnFinished>,
    ) -> TaskGroupId {
        let group = self.reserve_group(priority, on_finished);
        self.add_task_to_group(group, task);
        if let Some(prerequisite) = depends_on {
            self.add_task_group_dependency(group, prerequisite);
        }
        self.start_task_group(group);
        group
    }

    // ── Scheduling ──────────────────────────────────────────────────

    /// Expand the group's tasks into invocations and queue them.
    ///
    /// `high_priority` puts the batch at the front of its lane; used when a
    /// parked group is released by its last prerequisite.
    pub(super) fn schedule_group_tasks(&self, group: TaskGroupId, high_priority: bool) {
        let mut state = self.lock_state();
        let Some(slot) = state.live_slot(group) else {
            return;
        };
        let counters = Arc::clone(&slot.counters);
        let priority = slot.priority;

        if slot.tasks.is_empty() {
            counters.mark_scheduled(1);
            drop(state);
            debug!(group = %group, "empty task group completes immediately");
            if counters.invocation_finished() {
                self.finish_group(group);
            }
            return;
        }

        let total: u32 = slot.tasks.iter().map(|task| task.runs()).sum();
        counters.mark_scheduled(total);
        let mut batch = Vec::with_capacity(total as usize);
        for task in &slot.tasks {
            task.mark_scheduled();
            for index in 0..task.runs() {
                batch.push(Invocation {
                    group,
                    counters: Arc::clone(&counters),
                    task: Arc::clone(task),
                    index,
                });
            }
        }
        if high_priority {
            state.queues.push_front_batch(priority, batch);
        } else {
            state.queues.push_back_batch(priority, batch);
        }
        drop(state);

        debug!(
            group = %group,
            ?priority,
            invocations = total,
            high_priority,
            "task group scheduled"
        );
        self.dispatcher.wake_for(priority.category(), total as usize);
    }

    // ── Completion cascade ──────────────────────────────────────────

    /// A prerequisite of `group` finished.
    pub(super) fn dependency_has_finished(&self, group: TaskGroupId, counters: &GroupCounters) {
        if counters.dependency_finished() {
            debug!(group = %group, "last prerequisite finished");
            self.schedule_group_tasks(group, true);
        } else {
            trace!(
                group = %group,
                waiting_on = counters.active_dependencies(),
                "prerequisite finished"
            );
        }
    }

    /// Bookkeeping after an invocation executed or was cancelled.
    pub(super) fn task_has_finished(&self, invocation: Invocation) {
        let remaining_runs = invocation.task.invocation_finished();
        if remaining_runs == 0 {
            trace!(task = invocation.task.name(), group = %invocation.group, "task finished");
        }
        if invocation.counters.invocation_finished() {
            self.finish_group(invocation.group);
        }
        self.progress.notify();
    }

    fn finish_group(&self, group: TaskGroupId) {
        self.record(|m| m.groups_finished += 1);
        let on_finished = self
            .lock_state()
            .live_slot_mut(group)
            .and_then(|slot| slot.on_finished.take());
        if let Some(callback) = on_finished {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(group))).is_err() {
                error!(group = %group, "task group completion callback panicked");
            }
        }

        let (counters, dependents) = {
            let mut state = self.lock_state();
            let Some(slot) = state.live_slot_mut(group) else {
                return;
            };
            let counters = Arc::clone(&slot.counters);
            let released = slot.release();
            let dependents: Vec<_> = released
                .into_iter()
                .filter_map(|dependent| {
                    state
                        .live_slot(dependent)
                        .map(|slot| (dependent, Arc::clone(&slot.counters)))
                })
                .collect();
            (counters, dependents)
        };
        counters.finished.notify_all();
        debug!(group = %group, dependents = dependents.len(), "task group finished");

        for (dependent, counters) in dependents {
            self.dependency_has_finished(dependent, &counters);
        }
        self.progress.notify();
    }
}
