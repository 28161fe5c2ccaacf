//! Thread-local calling context.
//!
//! Records which worker category the current thread belongs to, which pool
//! slot it occupies (if any), whether it may block in a wait, and which task
//! it is executing. The scheduler reads this to pick lanes for helping, to
//! mark workers blocked, and to reject waits from contexts that must never
//! wait.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::pool::WorkerSlot;
use crate::task::Task;
use crate::types::WorkerCategory;

thread_local! {
    static CONTEXT: RefCell<ThreadContext> = RefCell::new(ThreadContext::default());
}

#[derive(Default)]
struct ThreadContext {
    category: Option<WorkerCategory>,
    slot: Option<Arc<WorkerSlot>>,
    no_wait_depth: usize,
    current_task: Option<Arc<Task>>,
}

/// Worker category of the calling thread, `None` for threads the scheduler
/// does not know about.
pub fn current_category() -> Option<WorkerCategory> {
    CONTEXT.with(|c| c.borrow().category)
}

/// Whether the calling thread may block in `wait_for_group` / `wait_for_condition`.
pub fn may_wait() -> bool {
    CONTEXT.with(|c| c.borrow().no_wait_depth == 0)
}

/// Whether the calling thread is a pool worker.
pub fn is_worker_thread() -> bool {
    CONTEXT.with(|c| c.borrow().slot.is_some())
}

/// Whether cancellation was requested for the task the calling thread is
/// executing. Long jobs poll this to stop early; outside a job it is `false`.
pub fn cancel_requested() -> bool {
    CONTEXT.with(|c| {
        c.borrow()
            .current_task
            .as_ref()
            .is_some_and(|task| task.is_cancel_requested())
    })
}

pub(crate) fn current_slot() -> Option<Arc<WorkerSlot>> {
    CONTEXT.with(|c| c.borrow().slot.clone())
}

// ── Guards ──────────────────────────────────────────────────────────

/// Forbids waiting on the current thread until dropped. Nests.
#[must_use = "waiting is only forbidden while the guard is alive"]
pub struct NoWaitGuard {
    _not_send: PhantomData<*const ()>,
}

/// Flag the calling thread as one that must never create a wait dependency.
/// A `wait_for_group` that would have to block panics instead.
pub fn forbid_waiting() -> NoWaitGuard {
    CONTEXT.with(|c| c.borrow_mut().no_wait_depth += 1);
    NoWaitGuard {
        _not_send: PhantomData,
    }
}

impl Drop for NoWaitGuard {
    fn drop(&mut self) {
        CONTEXT.with(|c| {
            let mut ctx = c.borrow_mut();
            ctx.no_wait_depth = ctx.no_wait_depth.saturating_sub(1);
        });
    }
}

/// Restores the previous category and slot when dropped.
#[must_use = "the thread leaves the context when the guard is dropped"]
pub struct CategoryGuard {
    previous: (Option<WorkerCategory>, Option<Arc<WorkerSlot>>),
    _not_send: PhantomData<*const ()>,
}

/// Mark the calling thread as the main thread. While the guard lives, the
/// thread drains the main-thread lane when it helps.
pub fn enter_main_thread() -> CategoryGuard {
    enter(Some(WorkerCategory::MainThread), None)
}

pub(crate) fn enter_worker(slot: Arc<WorkerSlot>) -> CategoryGuard {
    enter(Some(slot.category()), Some(slot))
}

fn enter(category: Option<WorkerCategory>, slot: Option<Arc<WorkerSlot>>) -> CategoryGuard {
    let previous = CONTEXT.with(|c| {
        let mut ctx = c.borrow_mut();
        let previous = (ctx.category, ctx.slot.take());
        ctx.category = category;
        ctx.slot = slot;
        previous
    });
    CategoryGuard {
        previous,
        _not_send: PhantomData,
    }
}

impl Drop for CategoryGuard {
    fn drop(&mut self) {
        let (category, slot) = (self.previous.0, self.previous.1.take());
        CONTEXT.with(|c| {
            let mut ctx = c.borrow_mut();
            ctx.category = category;
            ctx.slot = slot;
        });
    }
}

pub(crate) struct TaskGuard {
    previous: Option<Arc<Task>>,
}

pub(crate) fn enter_task(task: Arc<Task>) -> TaskGuard {
    let previous = CONTEXT.with(|c| c.borrow_mut().current_task.replace(task));
    TaskGuard { previous }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CONTEXT.with(|c| c.borrow_mut().current_task = previous);
    }
}
