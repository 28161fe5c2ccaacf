use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{Priority, WorkerCategory};

/// Scheduler operational metrics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Invocations executed by task name.
    pub invocations_executed: HashMap<String, u64>,
    /// Average invocation duration by task name.
    pub avg_invocation_duration: HashMap<String, Duration>,
    /// Last time an invocation of the task finished.
    pub last_run: HashMap<String, DateTime<Utc>>,
    pub groups_created: u64,
    pub groups_finished: u64,
    /// Queued invocations removed by cancellation.
    pub invocations_cancelled: u64,
    /// Invocations whose job panicked.
    pub job_panics: u64,
    /// Invocations executed through `help_executing_tasks`, mostly by waiting threads.
    pub helped_invocations: u64,
    /// Waits that had to block.
    pub blocking_waits: u64,
    /// Queued invocations per priority, filled in when the snapshot is taken.
    pub queued_invocations: HashMap<Priority, usize>,
    /// Sleeping workers per category, filled in when the snapshot is taken.
    pub sleeping_workers: HashMap<WorkerCategory, usize>,
}

impl SchedulerMetrics {
    /// Record one finished invocation.
    pub fn record_execution(&mut self, task_name: &str, duration: Duration) {
        *self
            .invocations_executed
            .entry(task_name.to_string())
            .or_default() += 1;
        self.last_run.insert(task_name.to_string(), Utc::now());

        let count = self.invocations_executed[task_name];
        let prev_avg = self
            .avg_invocation_duration
            .get(task_name)
            .copied()
            .unwrap_or_default();

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let new_avg = if count == 1 {
            duration
        } else {
            let prev_nanos = prev_avg.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };

        self.avg_invocation_duration
            .insert(task_name.to_string(), new_avg);
    }

    /// Total invocations executed across all tasks.
    pub fn total_executed(&self) -> u64 {
        self.invocations_executed.values().sum()
    }
}
