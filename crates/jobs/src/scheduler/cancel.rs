use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::CancelError;
use crate::task::Task;
use crate::types::{CancelPolicy, TaskGroupId};

use super::Scheduler;

impl Scheduler {
    /// Cancel every task of `group` that has not started running.
    ///
    /// Tasks of a group that was not scheduled yet are dropped from it; queued
    /// invocations are removed and counted as finished. Invocations that are
    /// already executing are never interrupted: with
    /// [`CancelPolicy::ReturnWithoutBlocking`] they are reported as
    /// [`CancelError::TasksRunning`], with [`CancelPolicy::WaitTillFinished`]
    /// the call waits for them.
    pub fn cancel_group(
        &self,
        group: TaskGroupId,
        policy: CancelPolicy,
    ) -> Result<(), CancelError> {
        let tasks = {
            let state = self.lock_state();
            match state.live_slot(group) {
                Some(slot) if !slot.counters.is_finished(group.generation) => slot.tasks.clone(),
                _ => return Ok(()),
            }
        };

        let running: Vec<Arc<Task>> = tasks
            .into_iter()
            .filter(|task| task.owner() == Some(group))
            .filter(|task| {
                self.cancel_task(task, CancelPolicy::ReturnWithoutBlocking)
                    .is_err()
            })
            .collect();
        if running.is_empty() {
            debug!(group = %group, "task group cancelled");
            return Ok(());
        }

        match policy {
            CancelPolicy::ReturnWithoutBlocking => {
                warn!(group = %group, running = running.len(), "cancel raced with running tasks");
                Err(CancelError::TasksRunning {
                    group,
                    running: running.len(),
                })
            }
            CancelPolicy::WaitTillFinished => {
                for task in &running {
                    self.wait_for_task(task);
                }
                debug!(group = %group, "task group cancelled after running tasks finished");
                Ok(())
            }
        }
    }

    /// Cancel the remaining invocations of `task`.
    ///
    /// Sets the task's cancel flag, which running jobs can poll through
    /// [`cancel_requested`](crate::context::cancel_requested).
    pub fn cancel_task(&self, task: &Arc<Task>, policy: CancelPolicy) -> Result<(), CancelError> {
        if task.is_finished() {
            return Ok(());
        }
        task.request_cancel();
        let Some(owner) = task.owner() else {
            return Ok(());
        };

        let removed = {
            let mut state = self.lock_state();
            let Some(slot) = state.live_slot_mut(owner) else {
                return Ok(());
            };
            if !slot.counters.is_scheduled() {
                if let Some(pos) = slot.tasks.iter().position(|t| Arc::ptr_eq(t, task)) {
                    slot.tasks.remove(pos);
                    task.mark_dropped();
                    debug!(task = task.name(), group = %owner, "task dropped before scheduling");
                }
                return Ok(());
            }
            state.queues.remove_task(task)
        };

        if !removed.is_empty() {
            let count = removed.len() as u64;
            self.record(|m| m.invocations_cancelled += count);
            debug!(
                task = task.name(),
                group = %owner,
                invocations = count,
                "queued invocations cancelled"
            );
            for invocation in removed {
                self.task_has_finished(invocation);
            }
        }

        if task.is_finished() {
            return Ok(());
        }
        match policy {
            CancelPolicy::ReturnWithoutBlocking => Err(CancelError::TaskRunning {
                task: task.name().to_string(),
            }),
            CancelPolicy::WaitTillFinished => {
                self.wait_for_task(task);
                Ok(())
            }
        }
    }
}
