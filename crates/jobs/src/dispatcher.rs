use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::error::JobError;
use crate::types::WorkerCategory;

/// The worker threads the scheduler hands work to.
///
/// Implementations own the threads of each pooled category. The scheduler
/// never starts or parks threads itself; it only asks the pool to wake
/// sleepers or to top a category up.
pub trait WorkerPool: Send + Sync {
    /// Wake up to `count` sleeping workers of `category`. Returns how many
    /// were actually woken.
    fn wake_up(&self, category: WorkerCategory, count: usize) -> usize;

    /// Make sure at least `minimum` workers of `category` exist.
    fn ensure_workers_started(&self, category: WorkerCategory, minimum: usize)
        -> Result<(), JobError>;

    /// Workers of `category` that are idle and not already promised a wakeup.
    fn sleeping_workers(&self, category: WorkerCategory) -> usize;

    /// Threads started for `category`, including compensation workers.
    fn worker_count(&self, category: WorkerCategory) -> usize;

    /// Stop every worker. Queued invocations are left in place.
    fn shutdown(&self);
}

/// Translates queue activity into pool requests.
pub struct WorkerDispatcher {
    config: SchedulerConfig,
    pool: Arc<dyn WorkerPool>,
}

impl WorkerDispatcher {
    pub fn new(config: SchedulerConfig, pool: Arc<dyn WorkerPool>) -> Self {
        Self { config, pool }
    }

    pub fn pool(&self) -> &Arc<dyn WorkerPool> {
        &self.pool
    }

    /// Start the configured number of workers for every pooled category.
    pub fn start_workers(&self) -> Result<(), JobError> {
        for category in WorkerCategory::POOLED {
            let workers = self.config.workers_for(category);
            self.pool.ensure_workers_started(category, workers)?;
            info!(category = %category, workers, "worker category started");
        }
        Ok(())
    }

    /// New work for `category`: wake as many sleepers as there are
    /// invocations, never more than are asleep.
    pub fn wake_for(&self, category: WorkerCategory, invocations: usize) -> usize {
        if category == WorkerCategory::MainThread || invocations == 0 {
            return 0;
        }
        let wanted = invocations.min(self.pool.sleeping_workers(category));
        if wanted == 0 {
            return 0;
        }
        self.pool.wake_up(category, wanted)
    }

    /// A worker of `category` is about to block in a wait. Wake a sleeper to
    /// take its place, or start an extra thread while under the category's
    /// ceiling.
    pub fn compensate_blocked(&self, category: WorkerCategory) {
        if category == WorkerCategory::MainThread {
            return;
        }
        if self.pool.wake_up(category, 1) > 0 {
            return;
        }
        let current = self.pool.worker_count(category);
        let ceiling = self.config.worker_ceiling(category);
        if current >= ceiling {
            debug!(category = %category, current, ceiling, "no compensation worker available");
            return;
        }
        if let Err(e) = self.pool.ensure_workers_started(category, current + 1) {
            warn!(category = %category, error = %e, "failed to start compensation worker");
        }
    }

    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Pool that records requests instead of running threads.
    #[derive(Default)]
    struct RecordingPool {
        sleeping: Mutex<usize>,
        workers: Mutex<usize>,
        wakes: Mutex<Vec<(WorkerCategory, usize)>>,
        starts: Mutex<Vec<(WorkerCategory, usize)>>,
    }

    impl WorkerPool for RecordingPool {
        fn wake_up(&self, category: WorkerCategory, count: usize) -> usize {
            let mut sleeping = self.sleeping.lock().unwrap();
            let woken = count.min(*sleeping);
            *sleeping -= woken;
            self.wakes.lock().unwrap().push((category, count));
            woken
        }

        fn ensure_workers_started(
            &self,
            category: WorkerCategory,
            minimum: usize,
        ) -> Result<(), JobError> {
            let mut workers = self.workers.lock().unwrap();
            *workers = (*workers).max(minimum);
            self.starts.lock().unwrap().push((category, minimum));
            Ok(())
        }

        fn sleeping_workers(&self, _category: WorkerCategory) -> usize {
            *self.sleeping.lock().unwrap()
        }

        fn worker_count(&self, _category: WorkerCategory) -> usize {
            *self.workers.lock().unwrap()
        }

        fn shutdown(&self) {}
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            short_task_workers: 2,
            long_task_workers: 1,
            file_access_workers: 1,
            max_extra_workers: 1,
            ..SchedulerConfig::default()
        }
    }

    fn dispatcher(sleeping: usize) -> (WorkerDispatcher, Arc<RecordingPool>) {
        let pool = Arc::new(RecordingPool::default());
        *pool.sleeping.lock().unwrap() = sleeping;
        let dyn_pool: Arc<dyn WorkerPool> = Arc::clone(&pool) as Arc<dyn WorkerPool>;
        (WorkerDispatcher::new(config(), dyn_pool), pool)
    }

    #[test]
    fn start_workers_covers_pooled_categories() {
        let (dispatcher, pool) = dispatcher(0);
        dispatcher.start_workers().unwrap();
        let starts = pool.starts.lock().unwrap().clone();
        assert_eq!(
            starts,
            vec![
                (WorkerCategory::ShortTasks, 2),
                (WorkerCategory::LongTasks, 1),
                (WorkerCategory::FileAccess, 1),
            ]
        );
    }

    #[test]
    fn wake_is_capped_by_sleepers() {
        let (dispatcher, pool) = dispatcher(2);
        assert_eq!(dispatcher.wake_for(WorkerCategory::ShortTasks, 5), 2);
        assert_eq!(pool.wakes.lock().unwrap().clone(), vec![(WorkerCategory::ShortTasks, 2)]);
    }

    #[test]
    fn no_wake_without_sleepers() {
        let (dispatcher, pool) = dispatcher(0);
        assert_eq!(dispatcher.wake_for(WorkerCategory::ShortTasks, 3), 0);
        assert!(pool.wakes.lock().unwrap().is_empty());
    }

    #[test]
    fn main_thread_work_wakes_nobody() {
        let (dispatcher, pool) = dispatcher(4);
        assert_eq!(dispatcher.wake_for(WorkerCategory::MainThread, 3), 0);
        dispatcher.compensate_blocked(WorkerCategory::MainThread);
        assert!(pool.wakes.lock().unwrap().is_empty());
        assert!(pool.starts.lock().unwrap().is_empty());
    }

    #[test]
    fn compensation_prefers_a_sleeper() {
        let (dispatcher, pool) = dispatcher(1);
        dispatcher.compensate_blocked(WorkerCategory::ShortTasks);
        assert_eq!(pool.wakes.lock().unwrap().len(), 1);
        assert!(pool.starts.lock().unwrap().is_empty());
    }

    #[test]
    fn compensation_starts_worker_up_to_ceiling() {
        let (dispatcher, pool) = dispatcher(0);
        *pool.workers.lock().unwrap() = 2;

        dispatcher.compensate_blocked(WorkerCategory::ShortTasks);
        assert_eq!(
            pool.starts.lock().unwrap().clone(),
            vec![(WorkerCategory::ShortTasks, 3)]
        );

        // Ceiling is 2 + 1 extra.
        dispatcher.compensate_blocked(WorkerCategory::ShortTasks);
        assert_eq!(pool.starts.lock().unwrap().len(), 1);
    }
}
