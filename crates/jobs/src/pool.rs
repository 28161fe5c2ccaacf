//! Category worker threads.
//!
//! Each pooled [`WorkerCategory`] owns a set of threads that drain the
//! category's lanes. Idle workers park on a per-category condvar. A worker
//! registers itself as sleeping before its final look at the queues, so a
//! wakeup issued after that look is never lost. Wakeups are handed out as
//! "pending" tokens bounded by the number of sleepers.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, trace, warn};

use crate::config::SchedulerConfig;
use crate::context;
use crate::dispatcher::WorkerPool;
use crate::error::JobError;
use crate::scheduler::Scheduler;
use crate::types::WorkerCategory;

// ── Worker slot ─────────────────────────────────────────────────────

/// What a pool worker is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Executing or looking for work.
    Active,
    /// Parked until new work arrives.
    Sleeping,
    /// Blocked in a wait on other work.
    Blocked,
}

/// Identity and state of one pool worker, shared with its thread-local context.
#[derive(Debug)]
pub struct WorkerSlot {
    category: WorkerCategory,
    index: usize,
    state: AtomicU8,
}

impl WorkerSlot {
    pub fn new(category: WorkerCategory, index: usize) -> Self {
        Self {
            category,
            index,
            state: AtomicU8::new(WorkerState::Active as u8),
        }
    }

    pub fn category(&self) -> WorkerCategory {
        self.category
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> WorkerState {
        match self.state.load(Ordering::Acquire) {
            1 => WorkerState::Sleeping,
            2 => WorkerState::Blocked,
            _ => WorkerState::Active,
        }
    }

    pub(crate) fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

// ── Per-category workers ────────────────────────────────────────────

#[derive(Debug, Default)]
struct IdleState {
    /// Workers registered as idle, including those holding a pending wakeup.
    sleeping: usize,
    /// Wakeups handed out but not yet consumed.
    pending: usize,
    shutdown: bool,
}

struct CategoryWorkers {
    category: WorkerCategory,
    idle: Mutex<IdleState>,
    wake: Condvar,
    slots: Mutex<Vec<Arc<WorkerSlot>>>,
}

impl CategoryWorkers {
    fn new(category: WorkerCategory) -> Self {
        Self {
            category,
            idle: Mutex::new(IdleState::default()),
            wake: Condvar::new(),
            slots: Mutex::new(Vec::new()),
        }
    }

    fn lock_idle(&self) -> MutexGuard<'_, IdleState> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register_sleeper(&self) -> bool {
        let mut idle = self.lock_idle();
        if idle.shutdown {
            return false;
        }
        idle.sleeping += 1;
        true
    }

    /// Undo `register_sleeper` after finding work on the final check.
    fn unregister_sleeper(&self) {
        let mut idle = self.lock_idle();
        idle.sleeping = idle.sleeping.saturating_sub(1);
        idle.pending = idle.pending.min(idle.sleeping);
    }

    /// Park until a wakeup token or shutdown. Returns false on shutdown.
    fn sleep(&self, slot: &WorkerSlot) -> bool {
        slot.set_state(WorkerState::Sleeping);
        let mut idle = self.lock_idle();
        let running = loop {
            if idle.shutdown {
                break false;
            }
            if idle.pending > 0 {
                idle.pending -= 1;
                break true;
            }
            idle = self.wake.wait(idle).unwrap_or_else(PoisonError::into_inner);
        };
        idle.sleeping = idle.sleeping.saturating_sub(1);
        drop(idle);
        slot.set_state(WorkerState::Active);
        running
    }

    fn wake_up(&self, count: usize) -> usize {
        let mut idle = self.lock_idle();
        let available = idle.sleeping.saturating_sub(idle.pending);
        let woken = count.min(available);
        if woken > 0 {
            idle.pending += woken;
            drop(idle);
            if woken == 1 {
                self.wake.notify_one();
            } else {
                self.wake.notify_all();
            }
        }
        woken
    }

    fn sleeping(&self) -> usize {
        let idle = self.lock_idle();
        idle.sleeping.saturating_sub(idle.pending)
    }

    fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn stop(&self) {
        self.lock_idle().shutdown = true;
        self.wake.notify_all();
    }
}

// ── Thread pool ─────────────────────────────────────────────────────

/// [`WorkerPool`] backed by named OS threads, one set per pooled category.
pub struct ThreadPool {
    config: SchedulerConfig,
    scheduler: Weak<Scheduler>,
    categories: [Arc<CategoryWorkers>; 3],
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
}

impl ThreadPool {
    /// Create an empty pool. Threads start on the first
    /// [`WorkerPool::ensure_workers_started`] call.
    pub fn new(config: SchedulerConfig, scheduler: Weak<Scheduler>) -> Self {
        Self {
            config,
            scheduler,
            categories: WorkerCategory::POOLED.map(|c| Arc::new(CategoryWorkers::new(c))),
            handles: Mutex::new(Vec::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    fn workers(&self, category: WorkerCategory) -> Option<&Arc<CategoryWorkers>> {
        self.categories.iter().find(|w| w.category == category)
    }

    fn spawn_worker(
        &self,
        workers: &Arc<CategoryWorkers>,
        index: usize,
    ) -> Result<Arc<WorkerSlot>, JobError> {
        let category = workers.category;
        let slot = Arc::new(WorkerSlot::new(category, index));
        let name = format!("{}-{}-{}", self.config.thread_name_prefix, category.label(), index);

        let thread_slot = Arc::clone(&slot);
        let thread_workers = Arc::clone(workers);
        let scheduler = self.scheduler.clone();
        let shutdown = Arc::clone(&self.shutdown);

        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || worker_loop(scheduler, thread_workers, thread_slot, shutdown))
            .map_err(|source| JobError::WorkerSpawn {
                category: category.label().to_string(),
                index,
                source,
            })?;

        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
        Ok(slot)
    }
}

impl WorkerPool for ThreadPool {
    fn wake_up(&self, category: WorkerCategory, count: usize) -> usize {
        match self.workers(category) {
            Some(workers) => workers.wake_up(count),
            None => 0,
        }
    }

    fn ensure_workers_started(
        &self,
        category: WorkerCategory,
        minimum: usize,
    ) -> Result<(), JobError> {
        let Some(workers) = self.workers(category) else {
            return Ok(());
        };
        let mut slots = workers.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // Checked under the slots lock, which shutdown passes through before joining.
        if self.shutdown.load(Ordering::Acquire) {
            return Ok(());
        }
        while slots.len() < minimum {
            let slot = self.spawn_worker(workers, slots.len())?;
            slots.push(slot);
        }
        debug!(category = %category, workers = slots.len(), "workers ensured");
        Ok(())
    }

    fn sleeping_workers(&self, category: WorkerCategory) -> usize {
        self.workers(category).map_or(0, |w| w.sleeping())
    }

    fn worker_count(&self, category: WorkerCategory) -> usize {
        self.workers(category).map_or(0, |w| w.len())
    }

    fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        for workers in &self.categories {
            workers.stop();
            // Wait out a concurrent ensure_workers_started so its handles get joined.
            drop(workers.slots.lock().unwrap_or_else(PoisonError::into_inner));
        }

        let handles: Vec<_> = std::mem::take(
            &mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let current = thread::current().id();
        let mut joined = 0usize;
        for handle in handles {
            // A worker dropping the last scheduler reference cannot join itself.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!("worker thread panicked outside a job");
            }
            joined += 1;
        }
        info!(joined, "worker pool stopped");
    }
}

fn worker_loop(
    scheduler: Weak<Scheduler>,
    workers: Arc<CategoryWorkers>,
    slot: Arc<WorkerSlot>,
    shutdown: Arc<AtomicBool>,
) {
    let category = workers.category;
    let _context = context::enter_worker(Arc::clone(&slot));
    trace!(category = %category, index = slot.index(), "worker started");

    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }
        let Some(current) = scheduler.upgrade() else {
            break;
        };
        if current.run_next_invocation() {
            continue;
        }

        if !workers.register_sleeper() {
            break;
        }
        if current.has_ready_invocations(category) {
            workers.unregister_sleeper();
            continue;
        }
        // Do not keep the scheduler alive while parked.
        drop(current);
        if !workers.sleep(&slot) {
            break;
        }
    }

    trace!(category = %category, index = slot.index(), "worker stopped");
}
