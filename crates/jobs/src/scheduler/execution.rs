use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, trace};

use crate::context;
use crate::queue::Invocation;
use crate::task::TaskNesting;
use crate::types::{Priority, TaskGroupId, WorkerCategory};

use super::Scheduler;

impl Scheduler {
    /// Execute one queued invocation the calling thread is allowed to run,
    /// preferring invocations of `prefer_group`. Returns false when nothing
    /// runnable was queued.
    ///
    /// Pool workers serve their category's lanes; the main thread serves the
    /// main-thread lane and the short-task lanes; any other thread serves
    /// the short-task lanes.
    pub fn help_executing_tasks(&self, prefer_group: Option<TaskGroupId>) -> bool {
        let lanes = WorkerCategory::lanes(context::current_category());
        let Some(invocation) = self.lock_state().queues.pop(lanes, prefer_group) else {
            return false;
        };
        self.record(|m| m.helped_invocations += 1);
        self.execute_invocation(invocation);
        true
    }

    /// Drain the main-thread lane on the calling thread. Returns the number of
    /// invocations executed; 0 unless the thread entered the main-thread
    /// context with [`enter_main_thread`](crate::context::enter_main_thread).
    pub fn execute_main_thread_tasks(&self) -> usize {
        if context::current_category() != Some(WorkerCategory::MainThread) {
            return 0;
        }
        let mut executed = 0;
        loop {
            let next = self.lock_state().queues.pop(&[Priority::MainThread], None);
            let Some(invocation) = next else {
                break;
            };
            self.execute_invocation(invocation);
            executed += 1;
        }
        executed
    }

    /// Worker entry point: run the next invocation of the worker's lanes.
    pub(crate) fn run_next_invocation(&self) -> bool {
        let lanes = WorkerCategory::lanes(context::current_category());
        let next = self.lock_state().queues.pop(lanes, None);
        match next {
            Some(invocation) => {
                self.execute_invocation(invocation);
                true
            }
            None => false,
        }
    }

    /// Whether the lanes of `category` hold work.
    pub(crate) fn has_ready_invocations(&self, category: WorkerCategory) -> bool {
        self.lock_state()
            .queues
            .has_ready(WorkerCategory::lanes(Some(category)))
    }

    fn execute_invocation(&self, invocation: Invocation) {
        let task = Arc::clone(&invocation.task);
        if task.is_cancel_requested() {
            trace!(task = task.name(), group = %invocation.group, "skipping cancelled invocation");
            self.record(|m| m.invocations_cancelled += 1);
            self.task_has_finished(invocation);
            return;
        }

        let outcome = {
            let _no_wait = (task.nesting() == TaskNesting::Never).then(context::forbid_waiting);
            let _running = context::enter_task(Arc::clone(&task));
            trace!(
                task = task.name(),
                group = %invocation.group,
                invocation = invocation.index,
                "executing"
            );

            let started = Instant::now();
            let result = panic::catch_unwind(AssertUnwindSafe(|| task.execute(invocation.index)));
            (result, started.elapsed())
        };

        let (result, elapsed) = outcome;
        let panicked = match result {
            Ok(()) => false,
            Err(payload) => {
                error!(
                    task = task.name(),
                    group = %invocation.group,
                    invocation = invocation.index,
                    panic = panic_message(payload.as_ref()),
                    "job panicked"
                );
                true
            }
        };
        self.record(|m| {
            m.record_execution(task.name(), elapsed);
            if panicked {
                m.job_panics += 1;
            }
        });
        self.task_has_finished(invocation);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
