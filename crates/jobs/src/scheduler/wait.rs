use std::sync::{Arc, PoisonError};
use std::thread;

use tracing::trace;

use crate::context;
use crate::pool::{WorkerSlot, WorkerState};
use crate::task::Task;
use crate::types::TaskGroupId;

use super::Scheduler;

/// Marks the calling worker blocked for the lifetime of the guard.
struct BlockedGuard {
    slot: Option<Arc<WorkerSlot>>,
}

impl BlockedGuard {
    fn enter() -> Self {
        let slot = context::current_slot();
        if let Some(slot) = &slot {
            slot.set_state(WorkerState::Blocked);
        }
        Self { slot }
    }
}

impl Drop for BlockedGuard {
    fn drop(&mut self) {
        if let Some(slot) = &self.slot {
            slot.set_state(WorkerState::Active);
        }
    }
}

impl Scheduler {
    /// Return once `group` finished, its completion callback returned and its
    /// dependents were released.
    ///
    /// While the group is unfinished the calling thread executes queued work
    /// it is allowed to run, the group's own invocations first. When there is
    /// nothing to help with it blocks, and a replacement worker is woken so
    /// the pool keeps its capacity.
    ///
    /// # Panics
    ///
    /// If the calling thread is not allowed to wait (inside a task with
    /// [`TaskNesting::Never`](crate::TaskNesting::Never) or under
    /// [`forbid_waiting`](crate::context::forbid_waiting)) and the group
    /// cannot be finished by helping.
    pub fn wait_for_group(&self, group: TaskGroupId) {
        let mut compensated = false;
        loop {
            if self.lock_state().is_released(group) {
                return;
            }
            if self.help_executing_tasks(Some(group)) {
                continue;
            }
            if !context::may_wait() {
                // Another thread is running the finish sequence; nothing
                // left for helping to do.
                assert!(
                    self.is_task_group_finished(group),
                    "waiting for {group}: this thread is not allowed to wait"
                );
                thread::yield_now();
                continue;
            }
            self.block_on_group(group, &mut compensated);
        }
    }

    /// Wait until every group in `groups` finished.
    pub fn wait_for_groups(&self, groups: &[TaskGroupId]) {
        for &group in groups {
            self.wait_for_group(group);
        }
    }

    /// Return once `condition` holds, helping with queued work meanwhile.
    ///
    /// The condition is re-tested after every finished invocation and at
    /// least every `condition_poll_interval_ms`. On a thread that may not
    /// wait, the loop yields instead of blocking.
    pub fn wait_for_condition(&self, condition: impl Fn() -> bool) {
        let mut compensated = false;
        loop {
            if condition() {
                return;
            }
            if self.help_executing_tasks(None) {
                continue;
            }
            if !context::may_wait() {
                thread::yield_now();
                continue;
            }

            let blocked = BlockedGuard::enter();
            if !compensated {
                compensated = true;
                self.record(|m| m.blocking_waits += 1);
                if let Some(slot) = &blocked.slot {
                    self.dispatcher.compensate_blocked(slot.category());
                }
            }
            self.progress
                .wait(&condition, self.config.condition_poll_interval());
            drop(blocked);
        }
    }

    /// Return once every invocation of `task`'s current run finished.
    pub fn wait_for_task(&self, task: &Task) {
        self.wait_for_condition(|| task.is_finished());
    }

    fn block_on_group(&self, group: TaskGroupId, compensated: &mut bool) {
        let state = self.lock_state();
        let Some(slot) = state.live_slot(group) else {
            return;
        };
        let counters = Arc::clone(&slot.counters);
        let group_category = slot.priority.category();
        drop(state);

        let blocked = BlockedGuard::enter();
        if !*compensated {
            *compensated = true;
            self.record(|m| m.blocking_waits += 1);
            let category = blocked
                .slot
                .as_ref()
                .map_or(group_category, |slot| slot.category());
            self.dispatcher.compensate_blocked(category);
        }
        trace!(group = %group, "blocking until group finishes");

        let state = self.lock_state();
        // Timed so work that only this thread may run gets another chance.
        let (state, _) = counters
            .finished
            .wait_timeout_while(state, self.config.condition_poll_interval(), |state| {
                !state.is_released(group)
            })
            .unwrap_or_else(PoisonError::into_inner);
        drop(state);
        drop(blocked);
    }
}
