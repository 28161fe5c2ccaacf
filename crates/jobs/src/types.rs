use std::fmt;

use serde::{Deserialize, Serialize};

/// Scheduling priority of a task group. Each priority is its own lane in the
/// ready queue; lanes are drained in declaration order, so earlier variants
/// run first within a worker category.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord,
)]
pub enum Priority {
    /// Latency-critical short work.
    Critical = 0,
    /// Short work that should run soon.
    High = 1,
    /// Default for short work.
    #[default]
    Normal = 2,
    /// Short work that can wait behind everything else.
    Low = 3,
    /// Short work that only runs when nothing else is ready.
    Background = 4,
    /// Long-running work that should start before other long work.
    LongRunningHigh = 5,
    /// Long-running work (seconds rather than milliseconds).
    LongRunning = 6,
    /// File-bound work that should start before other file work.
    FileAccessHigh = 7,
    /// File-bound work (blocking reads and writes).
    FileAccess = 8,
    /// Work that may only run on the thread that entered the main-thread context.
    MainThread = 9,
}

impl Priority {
    /// Number of priority lanes.
    pub const COUNT: usize = 10;

    /// Every priority in lane order.
    pub const ALL: [Priority; Priority::COUNT] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
        Priority::Background,
        Priority::LongRunningHigh,
        Priority::LongRunning,
        Priority::FileAccessHigh,
        Priority::FileAccess,
        Priority::MainThread,
    ];

    /// Lane index of this priority.
    pub fn lane(self) -> usize {
        self as usize
    }

    /// Worker category whose threads pick up invocations of this priority.
    pub fn category(self) -> WorkerCategory {
        match self {
            Priority::Critical
            | Priority::High
            | Priority::Normal
            | Priority::Low
            | Priority::Background => WorkerCategory::ShortTasks,
            Priority::LongRunningHigh | Priority::LongRunning => WorkerCategory::LongTasks,
            Priority::FileAccessHigh | Priority::FileAccess => WorkerCategory::FileAccess,
            Priority::MainThread => WorkerCategory::MainThread,
        }
    }
}

/// Class of worker thread a priority is mapped onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub enum WorkerCategory {
    /// Short-lived compute work.
    ShortTasks,
    /// Work that may occupy a thread for a long time.
    LongTasks,
    /// Work that blocks on the file system.
    FileAccess,
    /// Work pinned to the main thread. The pool never starts threads for it.
    MainThread,
}

const SHORT_LANES: &[Priority] = &[
    Priority::Critical,
    Priority::High,
    Priority::Normal,
    Priority::Low,
    Priority::Background,
];
const LONG_LANES: &[Priority] = &[Priority::LongRunningHigh, Priority::LongRunning];
const FILE_LANES: &[Priority] = &[Priority::FileAccessHigh, Priority::FileAccess];
const MAIN_LANES: &[Priority] = &[
    Priority::MainThread,
    Priority::Critical,
    Priority::High,
    Priority::Normal,
    Priority::Low,
    Priority::Background,
];

impl WorkerCategory {
    /// Categories backed by pool threads.
    pub const POOLED: [WorkerCategory; 3] = [
        WorkerCategory::ShortTasks,
        WorkerCategory::LongTasks,
        WorkerCategory::FileAccess,
    ];

    /// Lanes a thread of this category drains, in the order it tries them.
    /// Threads without a category are served like short-task workers.
    pub fn lanes(category: Option<WorkerCategory>) -> &'static [Priority] {
        match category {
            None | Some(WorkerCategory::ShortTasks) => SHORT_LANES,
            Some(WorkerCategory::LongTasks) => LONG_LANES,
            Some(WorkerCategory::FileAccess) => FILE_LANES,
            Some(WorkerCategory::MainThread) => MAIN_LANES,
        }
    }

    /// Short lowercase label used in thread names and logs.
    pub fn label(self) -> &'static str {
        match self {
            WorkerCategory::ShortTasks => "short",
            WorkerCategory::LongTasks => "long",
            WorkerCategory::FileAccess => "file",
            WorkerCategory::MainThread => "main",
        }
    }
}

impl fmt::Display for WorkerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Handle to a task group: the arena slot plus the slot generation at the
/// time the group was created.
///
/// A handle outlives its group. Once the group finishes the slot generation
/// moves on and the handle reports the group as finished forever, even after
/// the slot has been handed to a new group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskGroupId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl TaskGroupId {
    /// Arena slot this handle points at.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Slot generation captured when the group was created.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for TaskGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group#{}.{}", self.index, self.generation)
    }
}

/// What `cancel_group` / `cancel_task` do about invocations that are already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelPolicy {
    /// Report the running work as an error and return immediately.
    ReturnWithoutBlocking,
    /// Block (helping with other work) until the running invocations finish.
    WaitTillFinished,
}

/// Observable lifecycle state of a group handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GroupStatus {
    /// Created; tasks and dependencies may still be added.
    Building,
    /// Started but waiting for prerequisite groups.
    Parked,
    /// Invocations are queued or running.
    Scheduled,
    /// Ran to completion, or the handle is stale.
    Finished,
}
