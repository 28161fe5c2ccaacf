use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::config::SchedulerConfig;
use crate::context;
use crate::dispatcher::WorkerPool;
use crate::error::{CancelError, JobError};
use crate::scheduler::Scheduler;
use crate::task::{Task, TaskNesting};
use crate::types::{CancelPolicy, GroupStatus, Priority, TaskGroupId, WorkerCategory};

/// Pool without threads. The test thread drives execution through
/// `help_executing_tasks`, so every interleaving is deterministic.
#[derive(Default)]
struct ManualPool {
    sleeping: AtomicUsize,
    wakes: Mutex<Vec<(WorkerCategory, usize)>>,
    started: Mutex<HashMap<WorkerCategory, usize>>,
}

impl WorkerPool for ManualPool {
    fn wake_up(&self, category: WorkerCategory, count: usize) -> usize {
        self.wakes.lock().unwrap().push((category, count));
        count.min(self.sleeping.load(Ordering::SeqCst))
    }

    fn ensure_workers_started(
        &self,
        category: WorkerCategory,
        minimum: usize,
    ) -> Result<(), JobError> {
        let mut started = self.started.lock().unwrap();
        let workers = started.entry(category).or_default();
        *workers = (*workers).max(minimum);
        Ok(())
    }

    fn sleeping_workers(&self, _category: WorkerCategory) -> usize {
        self.sleeping.load(Ordering::SeqCst)
    }

    fn worker_count(&self, category: WorkerCategory) -> usize {
        self.started.lock().unwrap().get(&category).copied().unwrap_or(0)
    }

    fn shutdown(&self) {}
}

fn scheduler() -> (Arc<Scheduler>, Arc<ManualPool>) {
    let pool = Arc::new(ManualPool::default());
    let config = SchedulerConfig {
        short_task_workers: 2,
        ..SchedulerConfig::default()
    };
    let scheduler = Scheduler::with_pool(config, Arc::clone(&pool) as Arc<dyn WorkerPool>).unwrap();
    (scheduler, pool)
}

type Log = Arc<Mutex<Vec<String>>>;

fn recording_task(name: &str, multiplicity: u32, log: &Log) -> Arc<Task> {
    let log = Arc::clone(log);
    let label = name.to_string();
    Arc::new(
        Task::from_fn(name, move |i| log.lock().unwrap().push(format!("{label}#{i}")))
            .with_multiplicity(multiplicity),
    )
}

fn run_all(scheduler: &Scheduler) -> usize {
    let mut executed = 0;
    while scheduler.help_executing_tasks(None) {
        executed += 1;
    }
    executed
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

// ── Lifecycle ───────────────────────────────────────────────────────

#[test]
fn group_counts_every_invocation() {
    let (s, _) = scheduler();
    let log = Log::default();
    let fired = Arc::new(AtomicUsize::new(0));

    let f = Arc::clone(&fired);
    let g = s.create_task_group_with_callback(Priority::Normal, move |_| {
        f.fetch_add(1, Ordering::SeqCst);
    });
    let t1 = recording_task("t1", 1, &log);
    let t2 = recording_task("t2", 3, &log);
    s.add_task_to_group(g, Arc::clone(&t1));
    s.add_task_to_group(g, Arc::clone(&t2));
    assert_eq!(s.group_status(g), GroupStatus::Building);
    assert_eq!(s.remaining_invocations(g), 0);

    s.start_task_group(g);
    assert_eq!(s.group_status(g), GroupStatus::Scheduled);
    assert_eq!(s.remaining_invocations(g), 4);
    assert_eq!(s.queued_invocations(Priority::Normal), 4);
    assert_eq!(t2.remaining_runs(), 3);
    assert!(!s.is_task_group_finished(g));

    assert!(s.help_executing_tasks(None));
    assert_eq!(s.remaining_invocations(g), 3);
    assert!(t1.is_finished());

    assert_eq!(run_all(&s), 3);
    assert!(s.is_task_group_finished(g));
    assert!(t2.is_finished());
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(entries(&log), vec!["t1#0", "t2#0", "t2#1", "t2#2"]);

    let metrics = s.metrics();
    assert_eq!(metrics.groups_created, 1);
    assert_eq!(metrics.groups_finished, 1);
    assert_eq!(metrics.invocations_executed["t2"], 3);
    assert_eq!(metrics.total_executed(), 4);
}

#[test]
fn empty_group_finishes_on_start() {
    let (s, _) = scheduler();
    let fired = Arc::new(AtomicUsize::new(0));
    let f = Arc::clone(&fired);
    let g = s.create_task_group_with_callback(Priority::High, move |id| {
        assert_eq!(id.index(), 0);
        f.fetch_add(1, Ordering::SeqCst);
    });

    s.start_task_group(g);
    assert!(s.is_task_group_finished(g));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(s.queued_invocations(Priority::High), 0);
}

#[test]
fn stale_handle_stays_finished_after_reuse() {
    let (s, _) = scheduler();
    let first = s.create_task_group(Priority::Normal);
    s.start_task_group(first);
    assert!(s.is_task_group_finished(first));

    let second = s.create_task_group(Priority::Normal);
    assert_eq!(second.index(), first.index());
    assert_eq!(second.generation(), first.generation() + 1);
    assert!(s.is_task_group_finished(first));
    assert!(!s.is_task_group_finished(second));
    assert_eq!(s.group_status(first), GroupStatus::Finished);
    assert_eq!(s.group_status(second), GroupStatus::Building);

    s.start_task_group(second);
    assert!(s.is_task_group_finished(second));
}

#[test]
fn unknown_handle_is_finished() {
    let (s, _) = scheduler();
    let unknown = TaskGroupId { index: 42, generation: 0 };
    assert!(s.is_task_group_finished(unknown));
    assert_eq!(s.group_status(unknown), GroupStatus::Finished);
    assert_eq!(s.remaining_invocations(unknown), 0);
}

#[test]
fn slots_are_reused_before_growing() {
    let (s, _) = scheduler();
    let a = s.create_task_group(Priority::Normal);
    let b = s.create_task_group(Priority::Normal);
    assert_eq!((a.index(), b.index()), (0, 1));

    s.start_task_group(a);
    let c = s.create_task_group(Priority::Normal);
    assert_eq!(c.index(), 0);
    let d = s.create_task_group(Priority::Normal);
    assert_eq!(d.index(), 2);
}

#[test]
fn single_task_helper_wires_dependency_and_callback() {
    let (s, _) = scheduler();
    let log = Log::default();
    let first = s.create_task_group(Priority::Normal);
    s.add_task_to_group(first, recording_task("first", 1, &log));

    let fired = Arc::new(AtomicBool::new(false));
    let f = Arc::clone(&fired);
    let second = s.start_single_task(
        recording_task("second", 1, &log),
        Priority::Normal,
        Some(first),
        Some(Box::new(move |_| f.store(true, Ordering::SeqCst))),
    );
    assert_eq!(s.group_status(second), GroupStatus::Parked);

    s.start_task_group(first);
    run_all(&s);
    assert!(fired.load(Ordering::SeqCst));
    assert_eq!(entries(&log), vec!["first#0", "second#0"]);
}

// ── Dependencies ────────────────────────────────────────────────────

#[test]
fn released_dependents_jump_the_lane() {
    let (s, _) = scheduler();
    let log = Log::default();
    let a = s.create_task_group(Priority::Normal);
    let b = s.create_task_group(Priority::Normal);
    let c = s.create_task_group(Priority::Normal);
    s.add_task_to_group(a, recording_task("a", 1, &log));
    s.add_task_to_group(b, recording_task("b", 2, &log));
    s.add_task_to_group(c, recording_task("c", 2, &log));
    s.add_task_group_dependency(b, a);

    s.start_task_group(b);
    assert_eq!(s.group_status(b), GroupStatus::Parked);
    assert_eq!(s.queued_invocations(Priority::Normal), 0);

    s.start_task_group(a);
    s.start_task_group(c);
    assert_eq!(s.queued_invocations(Priority::Normal), 3);

    assert!(s.help_executing_tasks(None));
    assert!(s.is_task_group_finished(a));
    assert_eq!(s.group_status(b), GroupStatus::Scheduled);

    run_all(&s);
    assert_eq!(entries(&log), vec!["a#0", "b#0", "b#1", "c#0", "c#1"]);
}

#[test]
fn dependent_waits_for_every_prerequisite() {
    let (s, _) = scheduler();
    let log = Log::default();
    let a = s.create_task_group(Priority::Normal);
    let b = s.create_task_group(Priority::Low);
    let c = s.create_task_group(Priority::Normal);
    s.add_task_to_group(a, recording_task("a", 1, &log));
    s.add_task_to_group(b, recording_task("b", 1, &log));
    s.add_task_to_group(c, recording_task("c", 1, &log));
    s.add_task_group_dependencies(c, &[a, b]);
    s.start_task_group(c);
    s.start_task_group(a);
    s.start_task_group(b);

    // Normal lane drains before Low.
    assert!(s.help_executing_tasks(None));
    assert_eq!(entries(&log), vec!["a#0"]);
    assert_eq!(s.group_status(c), GroupStatus::Parked);

    assert!(s.help_executing_tasks(None));
    assert_eq!(s.group_status(c), GroupStatus::Scheduled);
    run_all(&s);
    assert_eq!(entries(&log), vec!["a#0", "b#0", "c#0"]);
}

#[test]
fn finished_or_stale_prerequisites_do_not_park() {
    let (s, _) = scheduler();
    let done = s.create_task_group(Priority::Normal);
    s.start_task_group(done);

    let g = s.create_task_group(Priority::Normal);
    s.add_task_to_group(g, Arc::new(Task::from_fn("work", |_| {})));
    s.add_task_group_dependency(g, done);
    s.start_task_group(g);
    assert_eq!(s.group_status(g), GroupStatus::Scheduled);
    assert_eq!(s.queued_invocations(Priority::Normal), 1);
}

#[test]
fn dependency_added_after_start_is_ignored() {
    let (s, _) = scheduler();
    let blocker = s.create_task_group(Priority::Normal);
    s.add_task_to_group(blocker, Arc::new(Task::from_fn("blocker", |_| {})));

    let g = s.create_task_group(Priority::Normal);
    s.add_task_to_group(g, Arc::new(Task::from_fn("work", |_| {})));
    s.start_task_group(g);
    s.add_task_group_dependency(g, blocker);

    run_all(&s);
    assert!(s.is_task_group_finished(g));
    assert!(!s.is_task_group_finished(blocker));
}

// ── Contract violations ─────────────────────────────────────────────

#[test]
#[should_panic(expected = "cannot depend on itself")]
fn self_dependency_panics() {
    let (s, _) = scheduler();
    let g = s.create_task_group(Priority::Normal);
    s.add_task_group_dependency(g, g);
}

#[test]
#[should_panic(expected = "still running")]
fn adding_unfinished_task_panics() {
    let (s, _) = scheduler();
    let task = Arc::new(Task::from_fn("shared", |_| {}));
    let first = s.create_task_group(Priority::Normal);
    s.add_task_to_group(first, Arc::clone(&task));
    s.start_task_group(first);

    let second = s.create_task_group(Priority::Normal);
    s.add_task_to_group(second, task);
}

#[test]
#[should_panic(expected = "must be named")]
fn unnamed_task_panics() {
    let (s, _) = scheduler();
    let g = s.create_task_group(Priority::Normal);
    s.add_task_to_group(g, Arc::new(Task::from_fn("", |_| {})));
}

#[test]
#[should_panic(expected = "already started")]
fn adding_to_started_group_panics() {
    let (s, _) = scheduler();
    let g = s.create_task_group(Priority::Normal);
    s.add_task_to_group(g, Arc::new(Task::from_fn("first", |_| {})));
    s.start_task_group(g);
    s.add_task_to_group(g, Arc::new(Task::from_fn("late", |_| {})));
}

#[test]
#[should_panic(expected = "already started")]
fn starting_twice_panics() {
    let (s, _) = scheduler();
    let g = s.create_task_group(Priority::Normal);
    s.add_task_to_group(g, Arc::new(Task::from_fn("once", |_| {})));
    s.start_task_group(g);
    s.start_task_group(g);
}

#[test]
#[should_panic(expected = "not allowed to wait")]
fn forbidden_wait_panics() {
    let (s, _) = scheduler();
    let g = s.create_task_group(Priority::MainThread);
    s.add_task_to_group(g, Arc::new(Task::from_fn("pinned", |_| {})));
    s.start_task_group(g);

    let _guard = context::forbid_waiting();
    s.wait_for_group(g);
}

#[test]
fn task_reusable_after_its_run() {
    let (s, _) = scheduler();
    let log = Log::default();
    let task = recording_task("again", 2, &log);
    for _ in 0..2 {
        let g = s.create_task_group(Priority::Normal);
        s.add_task_to_group(g, Arc::clone(&task));
        s.start_task_group(g);
        run_all(&s);
        assert!(s.is_task_group_finished(g));
        assert_eq!(task.owner(), Some(g));
    }
    assert_eq!(entries(&log).len(), 4);
}

// ── Execution ───────────────────────────────────────────────────────

#[test]
fn wake_requests_capped_by_sleeping_workers() {
    let (s, pool) = scheduler();
    pool.sleeping.store(2, Ordering::SeqCst);
    let g = s.create_task_group(Priority::Normal);
    s.add_task_to_group(g, Arc::new(Task::from_fn("wide", |_| {}).with_multiplicity(5)));
    s.start_task_group(g);
    assert_eq!(pool.wakes.lock().unwrap().clone(), vec![(WorkerCategory::ShortTasks, 2)]);

    pool.sleeping.store(0, Ordering::SeqCst);
    let h = s.create_task_group(Priority::LongRunning);
    s.add_task_to_group(h, Arc::new(Task::from_fn("long", |_| {})));
    s.start_task_group(h);
    assert_eq!(pool.wakes.lock().unwrap().len(), 1);
}

#[test]
fn workers_started_per_category() {
    let (_s, pool) = scheduler();
    let started = pool.started.lock().unwrap().clone();
    assert_eq!(started[&WorkerCategory::ShortTasks], 2);
    assert_eq!(started[&WorkerCategory::LongTasks], 2);
    assert_eq!(started[&WorkerCategory::FileAccess], 1);
    assert!(!started.contains_key(&WorkerCategory::MainThread));
}

#[test]
fn main_thread_lane_runs_only_on_main_thread() {
    let (s, pool) = scheduler();
    pool.sleeping.store(4, Ordering::SeqCst);
    let log = Log::default();
    let g = s.create_task_group(Priority::MainThread);
    s.add_task_to_group(g, recording_task("ui", 1, &log));
    s.start_task_group(g);
    assert!(pool.wakes.lock().unwrap().is_empty());

    assert!(!s.help_executing_tasks(None));
    assert_eq!(s.execute_main_thread_tasks(), 0);
    assert_eq!(s.queued_invocations(Priority::MainThread), 1);

    let _main = context::enter_main_thread();
    assert_eq!(s.execute_main_thread_tasks(), 1);
    assert!(s.is_task_group_finished(g));
    assert_eq!(entries(&log), vec!["ui#0"]);
}

#[test]
fn never_nesting_task_runs_with_waiting_forbidden() {
    let (s, _) = scheduler();
    let observed = Arc::new(Mutex::new(Vec::new()));

    let o = Arc::clone(&observed);
    let strict = Task::from_fn("strict", move |_| o.lock().unwrap().push(context::may_wait()))
        .with_nesting(TaskNesting::Never);
    let o = Arc::clone(&observed);
    let relaxed = Task::from_fn("relaxed", move |_| o.lock().unwrap().push(context::may_wait()));

    let g = s.create_task_group(Priority::Normal);
    s.add_task_to_group(g, Arc::new(strict));
    s.add_task_to_group(g, Arc::new(relaxed));
    s.start_task_group(g);
    run_all(&s);

    assert_eq!(observed.lock().unwrap().clone(), vec![false, true]);
    assert!(context::may_wait());
}

#[test]
fn job_panic_is_contained() {
    let (s, _) = scheduler();
    let g = s.create_task_group(Priority::Normal);
    s.add_task_to_group(g, Arc::new(Task::from_fn("boom", |_| panic!("job failed"))));
    s.start_task_group(g);

    assert_eq!(run_all(&s), 1);
    assert!(s.is_task_group_finished(g));
    assert_eq!(s.metrics().job_panics, 1);
}

#[test]
fn jobs_see_their_own_cancel_flag() {
    let (s, _) = scheduler();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let o = Arc::clone(&seen);
    let g = s.create_task_group(Priority::Normal);
    s.add_task_to_group(
        g,
        Arc::new(Task::from_fn("poll", move |_| {
            o.lock().unwrap().push(context::cancel_requested())
        })),
    );
    s.start_task_group(g);
    run_all(&s);
    assert_eq!(seen.lock().unwrap().clone(), vec![false]);
}

// ── Waiting ─────────────────────────────────────────────────────────

#[test]
fn wait_for_group_helps_with_its_own_work() {
    let (s, _) = scheduler();
    let log = Log::default();
    let g = s.create_task_group(Priority::Normal);
    s.add_task_to_group(g, recording_task("mine", 3, &log));
    s.start_task_group(g);

    s.wait_for_group(g);
    assert!(s.is_task_group_finished(g));
    let metrics = s.metrics();
    assert_eq!(metrics.helped_invocations, 3);
    assert_eq!(metrics.blocking_waits, 0);
}

#[test]
fn wait_for_group_prefers_the_awaited_group() {
    let (s, _) = scheduler();
    let log = Log::default();
    let x = s.create_task_group(Priority::Normal);
    let y = s.create_task_group(Priority::Normal);
    s.add_task_to_group(x, recording_task("x", 1, &log));
    s.add_task_to_group(y, recording_task("y", 1, &log));
    s.start_task_group(x);
    s.start_task_group(y);

    s.wait_for_group(y);
    assert_eq!(entries(&log), vec!["y#0"]);
    assert!(!s.is_task_group_finished(x));
    assert_eq!(s.queued_invocations(Priority::Normal), 1);
}

#[test]
fn wait_for_condition_helps_until_true() {
    let (s, _) = scheduler();
    let flag = Arc::new(AtomicBool::new(false));
    let f = Arc::clone(&flag);
    let g = s.create_task_group(Priority::Low);
    let flip = Task::from_fn("flip", move |_| f.store(true, Ordering::SeqCst));
    s.add_task_to_group(g, Arc::new(flip));
    s.start_task_group(g);

    s.wait_for_condition(|| flag.load(Ordering::SeqCst));
    assert!(flag.load(Ordering::SeqCst));
}

#[test]
fn wait_for_task_blocks_until_helper_finishes() {
    let (s, _) = scheduler();
    let release = Arc::new(AtomicBool::new(false));
    let started = Arc::new(AtomicBool::new(false));
    let task = blocking_task("slow", &started, &release);

    let g = s.create_task_group(Priority::Normal);
    s.add_task_to_group(g, Arc::clone(&task));
    s.start_task_group(g);
    let helper = spawn_helper(&s);
    wait_until(&started);

    let r = Arc::clone(&release);
    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        r.store(true, Ordering::SeqCst);
    });
    s.wait_for_task(&task);
    assert!(task.is_finished());
    assert!(helper.join().unwrap());
    releaser.join().unwrap();
    assert!(s.metrics().blocking_waits >= 1);
}

#[test]
fn wait_for_group_returns_after_completion_callback() {
    let (s, _) = scheduler();
    let callback_done = Arc::new(AtomicBool::new(false));
    let done = Arc::clone(&callback_done);
    let g = s.create_task_group_with_callback(Priority::Normal, move |_| {
        thread::sleep(Duration::from_millis(100));
        done.store(true, Ordering::SeqCst);
    });
    let release = Arc::new(AtomicBool::new(false));
    let started = Arc::new(AtomicBool::new(false));
    s.add_task_to_group(g, blocking_task("slow", &started, &release));
    s.start_task_group(g);

    let helper = spawn_helper(&s);
    wait_until(&started);
    release.store(true, Ordering::SeqCst);
    s.wait_for_group(g);

    assert!(callback_done.load(Ordering::SeqCst));
    assert_eq!(s.metrics().groups_finished, 1);
    assert!(helper.join().unwrap());
}

#[test]
fn dependent_started_during_callback_waits_for_release() {
    let (s, _) = scheduler();
    let in_callback = Arc::new(AtomicBool::new(false));
    let leave_callback = Arc::new(AtomicBool::new(false));
    let (entered, leave) = (Arc::clone(&in_callback), Arc::clone(&leave_callback));
    let first = s.create_task_group_with_callback(Priority::Normal, move |_| {
        entered.store(true, Ordering::SeqCst);
        wait_until(&leave);
    });
    s.add_task_to_group(first, Arc::new(Task::from_fn("first", |_| {})));
    s.start_task_group(first);

    let helper = spawn_helper(&s);
    wait_until(&in_callback);
    assert!(s.is_task_group_finished(first));

    let log = Log::default();
    let second = s.create_task_group(Priority::Normal);
    s.add_task_to_group(second, recording_task("second", 1, &log));
    s.add_task_group_dependency(second, first);
    s.start_task_group(second);
    assert_eq!(s.group_status(second), GroupStatus::Parked);
    assert_eq!(s.queued_invocations(Priority::Normal), 0);

    leave_callback.store(true, Ordering::SeqCst);
    assert!(helper.join().unwrap());
    assert_eq!(s.group_status(second), GroupStatus::Scheduled);
    run_all(&s);
    assert_eq!(entries(&log), vec!["second#0"]);
}

#[test]
fn forbidden_condition_wait_yields_instead_of_blocking() {
    let (s, _) = scheduler();
    let polls = AtomicUsize::new(0);

    let _guard = context::forbid_waiting();
    s.wait_for_condition(|| polls.fetch_add(1, Ordering::SeqCst) >= 3);

    assert_eq!(polls.load(Ordering::SeqCst), 4);
    assert_eq!(s.metrics().blocking_waits, 0);
}

#[test]
fn forbidden_wait_succeeds_by_helping() {
    let (s, _) = scheduler();
    let log = Log::default();
    let g = s.create_task_group(Priority::Normal);
    s.add_task_to_group(g, recording_task("local", 2, &log));
    s.start_task_group(g);

    let _guard = context::forbid_waiting();
    s.wait_for_group(g);

    assert_eq!(entries(&log), vec!["local#0", "local#1"]);
    assert!(s.is_task_group_finished(g));
    assert_eq!(s.metrics().blocking_waits, 0);
}

// ── Cancellation ────────────────────────────────────────────────────

fn blocking_task(name: &str, started: &Arc<AtomicBool>, release: &Arc<AtomicBool>) -> Arc<Task> {
    let started = Arc::clone(started);
    let release = Arc::clone(release);
    Arc::new(Task::from_fn(name, move |_| {
        started.store(true, Ordering::SeqCst);
        while !release.load(Ordering::SeqCst) {
            thread::yield_now();
        }
    }))
}

fn spawn_helper(s: &Arc<Scheduler>) -> thread::JoinHandle<bool> {
    let s = Arc::clone(s);
    thread::spawn(move || s.help_executing_tasks(None))
}

fn wait_until(flag: &AtomicBool) {
    while !flag.load(Ordering::SeqCst) {
        thread::yield_now();
    }
}

#[test]
fn cancel_before_dispatch_never_blocks() {
    let (s, _) = scheduler();
    let log = Log::default();
    let task = recording_task("early", 2, &log);
    let g = s.create_task_group(Priority::Normal);
    s.add_task_to_group(g, Arc::clone(&task));

    assert_eq!(s.cancel_task(&task, CancelPolicy::ReturnWithoutBlocking), Ok(()));
    assert!(task.is_finished());
    assert!(task.is_cancel_requested());

    s.start_task_group(g);
    assert!(s.is_task_group_finished(g));
    assert_eq!(run_all(&s), 0);
    assert!(entries(&log).is_empty());
}

#[test]
fn cancel_queued_group_reports_every_invocation() {
    let (s, _) = scheduler();
    let log = Log::default();
    let fired = Arc::new(AtomicUsize::new(0));
    let f = Arc::clone(&fired);
    let g = s.create_task_group_with_callback(Priority::Normal, move |_| {
        f.fetch_add(1, Ordering::SeqCst);
    });
    s.add_task_to_group(g, recording_task("t", 3, &log));
    s.add_task_to_group(g, recording_task("u", 1, &log));
    s.start_task_group(g);

    assert_eq!(s.cancel_group(g, CancelPolicy::ReturnWithoutBlocking), Ok(()));
    assert!(s.is_task_group_finished(g));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(s.queued_invocations(Priority::Normal), 0);
    assert_eq!(s.metrics().invocations_cancelled, 4);
    assert!(entries(&log).is_empty());

    // Cancelling a finished group is a no-op.
    assert_eq!(s.cancel_group(g, CancelPolicy::WaitTillFinished), Ok(()));
}

#[test]
fn cancel_parked_group_runs_nothing() {
    let (s, _) = scheduler();
    let log = Log::default();
    let a = s.create_task_group(Priority::Normal);
    let b = s.create_task_group(Priority::Normal);
    s.add_task_to_group(a, recording_task("a", 1, &log));
    s.add_task_to_group(b, recording_task("b", 2, &log));
    s.add_task_group_dependency(b, a);
    s.start_task_group(b);

    assert_eq!(s.cancel_group(b, CancelPolicy::ReturnWithoutBlocking), Ok(()));
    assert_eq!(s.group_status(b), GroupStatus::Parked);

    s.start_task_group(a);
    run_all(&s);
    assert!(s.is_task_group_finished(b));
    assert_eq!(entries(&log), vec!["a#0"]);
}

#[test]
fn cancel_flag_skips_dequeued_invocations() {
    let (s, _) = scheduler();
    let log = Log::default();
    let task = recording_task("late", 2, &log);
    let g = s.create_task_group(Priority::Normal);
    s.add_task_to_group(g, Arc::clone(&task));
    s.start_task_group(g);

    // Flag set without removing the queued invocations, as when a cancel
    // races with a worker that already dequeued them.
    task.request_cancel();
    assert_eq!(run_all(&s), 2);
    assert!(s.is_task_group_finished(g));
    assert!(entries(&log).is_empty());
    assert_eq!(s.metrics().invocations_cancelled, 2);
}

#[test]
fn cancel_running_task_reports_then_waits() {
    let (s, _) = scheduler();
    let started = Arc::new(AtomicBool::new(false));
    let release = Arc::new(AtomicBool::new(false));
    let task = blocking_task("slow", &started, &release);
    let g = s.create_task_group(Priority::Normal);
    s.add_task_to_group(g, Arc::clone(&task));
    s.start_task_group(g);

    let helper = spawn_helper(&s);
    wait_until(&started);

    assert_eq!(
        s.cancel_task(&task, CancelPolicy::ReturnWithoutBlocking),
        Err(CancelError::TaskRunning { task: "slow".to_string() })
    );
    assert_eq!(
        s.cancel_group(g, CancelPolicy::ReturnWithoutBlocking),
        Err(CancelError::TasksRunning { group: g, running: 1 })
    );
    assert!(task.is_cancel_requested());
    assert!(!s.is_task_group_finished(g));

    let r = Arc::clone(&release);
    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        r.store(true, Ordering::SeqCst);
    });
    assert_eq!(s.cancel_group(g, CancelPolicy::WaitTillFinished), Ok(()));
    assert!(task.is_finished());

    assert!(helper.join().unwrap());
    releaser.join().unwrap();
    assert!(s.is_task_group_finished(g));
}
