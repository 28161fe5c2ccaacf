use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use tracing::info;

use crate::config::SchedulerConfig;
use crate::dispatcher::{WorkerDispatcher, WorkerPool};
use crate::error::JobError;
use crate::group::GroupSlot;
use crate::metrics::SchedulerMetrics;
use crate::pool::ThreadPool;
use crate::queue::PriorityQueueSet;
use crate::types::{GroupStatus, Priority, TaskGroupId, WorkerCategory};

/// Everything guarded by the structural lock: the group arena, the
/// dependency edges stored in it, and the ready queues.
#[derive(Default)]
pub(super) struct SchedulerState {
    pub(super) slots: Vec<GroupSlot>,
    pub(super) queues: PriorityQueueSet,
}

impl SchedulerState {
    pub(super) fn live_slot(&self, id: TaskGroupId) -> Option<&GroupSlot> {
        self.slots.get(id.index as usize).filter(|slot| slot.holds(id))
    }

    pub(super) fn live_slot_mut(&mut self, id: TaskGroupId) -> Option<&mut GroupSlot> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.holds(id))
    }

    pub(super) fn is_finished(&self, id: TaskGroupId) -> bool {
        self.slots
            .get(id.index as usize)
            .map_or(true, |slot| slot.counters.is_finished(id.generation))
    }

    /// Whether the group behind `id` completed its whole finish sequence:
    /// callback fired, slot released, dependents taken.
    pub(super) fn is_released(&self, id: TaskGroupId) -> bool {
        self.live_slot(id).is_none()
    }
}

/// Scheduler-wide signal bumped whenever an invocation finishes.
///
/// Condition waits block on it with a timeout; notifiers skip the lock when
/// nobody is waiting.
#[derive(Default)]
pub(super) struct ProgressSignal {
    epoch: Mutex<u64>,
    changed: Condvar,
    waiters: AtomicUsize,
}

impl ProgressSignal {
    pub(super) fn notify(&self) {
        if self.waiters.load(Ordering::SeqCst) == 0 {
            return;
        }
        *self.epoch.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        self.changed.notify_all();
    }

    /// Block until the next progress notification, the timeout, or until
    /// `done` already holds.
    pub(super) fn wait(&self, done: &dyn Fn() -> bool, timeout: Duration) {
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let seen = *self.epoch.lock().unwrap_or_else(PoisonError::into_inner);
        if !done() {
            let epoch = self.epoch.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = self
                .changed
                .wait_timeout_while(epoch, timeout, |epoch| *epoch == seen)
                .unwrap_or_else(PoisonError::into_inner);
        }
        self.waiters.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The job scheduler.
///
/// Groups of [`Task`](crate::Task)s are created, wired together with
/// dependencies and started. Started groups are queued by priority once all
/// their prerequisites finished and executed by the worker pool. Any thread
/// may wait for a group; a waiting thread executes queued work while it waits.
///
/// Create one with [`Scheduler::new`] and stop it with [`Scheduler::shutdown`].
pub struct Scheduler {
    pub(super) config: SchedulerConfig,
    pub(super) state: Mutex<SchedulerState>,
    pub(super) dispatcher: WorkerDispatcher,
    pub(super) progress: ProgressSignal,
    pub(super) metrics: Arc<RwLock<SchedulerMetrics>>,
    pub(super) shut_down: AtomicBool,
}

impl Scheduler {
    /// Create a scheduler backed by a [`ThreadPool`] and start its workers.
    pub fn new(config: SchedulerConfig) -> Result<Arc<Self>, JobError> {
        config.validate()?;
        let scheduler = Arc::new_cyclic(|weak| {
            let pool: Arc<dyn WorkerPool> = Arc::new(ThreadPool::new(config.clone(), weak.clone()));
            Self::build(config, pool)
        });
        scheduler.start()?;
        Ok(scheduler)
    }

    /// Create a scheduler on top of a custom worker pool.
    pub fn with_pool(
        config: SchedulerConfig,
        pool: Arc<dyn WorkerPool>,
    ) -> Result<Arc<Self>, JobError> {
        config.validate()?;
        let scheduler = Arc::new(Self::build(config, pool));
        scheduler.start()?;
        Ok(scheduler)
    }

    fn build(config: SchedulerConfig, pool: Arc<dyn WorkerPool>) -> Self {
        Self {
            dispatcher: WorkerDispatcher::new(config.clone(), pool),
            config,
            state: Mutex::new(SchedulerState::default()),
            progress: ProgressSignal::default(),
            metrics: Arc::new(RwLock::new(SchedulerMetrics::default())),
            shut_down: AtomicBool::new(false),
        }
    }

    fn start(&self) -> Result<(), JobError> {
        if let Err(e) = self.dispatcher.start_workers() {
            self.shutdown();
            return Err(e);
        }
        info!(
            short = self.config.resolved_short_task_workers(),
            long = self.config.long_task_workers,
            file = self.config.file_access_workers,
            "scheduler started"
        );
        Ok(())
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Whether the group behind `id` ran to completion. Stale and unknown
    /// handles are finished.
    pub fn is_task_group_finished(&self, id: TaskGroupId) -> bool {
        self.lock_state().is_finished(id)
    }

    pub fn group_status(&self, id: TaskGroupId) -> GroupStatus {
        let state = self.lock_state();
        match state.slots.get(id.index as usize) {
            Some(slot) => slot.status(id),
            None => GroupStatus::Finished,
        }
    }

    /// Invocations of the group that have not finished yet. 0 for groups that
    /// are not scheduled yet and for finished groups.
    pub fn remaining_invocations(&self, id: TaskGroupId) -> u32 {
        let state = self.lock_state();
        match state.live_slot(id) {
            Some(slot) if slot.counters.is_scheduled() => slot.counters.remaining_invocations(),
            _ => 0,
        }
    }

    /// Invocations waiting in the lane of `priority`.
    pub fn queued_invocations(&self, priority: Priority) -> usize {
        self.lock_state().queues.len(priority)
    }

    /// Get a snapshot of the current scheduler metrics.
    pub fn metrics(&self) -> SchedulerMetrics {
        let mut snapshot = self
            .metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        {
            let state = self.lock_state();
            for priority in Priority::ALL {
                snapshot
                    .queued_invocations
                    .insert(priority, state.queues.len(priority));
            }
        }
        let pool = self.dispatcher.pool();
        for category in WorkerCategory::POOLED {
            snapshot
                .sleeping_workers
                .insert(category, pool.sleeping_workers(category));
        }
        snapshot
    }

    /// Stop the worker pool. Invocations still queued are not executed by
    /// workers any more; threads calling into the scheduler can still help
    /// them along. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let queued = self.lock_state().queues.total_len();
        info!(queued, "scheduler shutdown requested");
        self.dispatcher.shutdown();
    }

    pub(super) fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn record(&self, update: impl FnOnce(&mut SchedulerMetrics)) {
        if let Ok(mut metrics) = self.metrics.write() {
            update(&mut metrics);
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
