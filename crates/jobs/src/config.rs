use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::JobError;
use crate::types::WorkerCategory;

// ── Scheduler config ────────────────────────────────────────────────

/// Worker pool and wait-loop configuration.
///
/// Parsed from TOML with `STUPID_JOBS_*` environment overrides applied on top.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Short-task worker threads. 0 = available parallelism minus one (at least 1).
    #[serde(default = "default_short_task_workers")]
    pub short_task_workers: usize,

    /// Long-running worker threads.
    #[serde(default = "default_long_task_workers")]
    pub long_task_workers: usize,

    /// File-access worker threads.
    #[serde(default = "default_file_access_workers")]
    pub file_access_workers: usize,

    /// Extra threads a category may start to replace workers blocked in a wait.
    #[serde(default = "default_max_extra_workers")]
    pub max_extra_workers: usize,

    /// How often a blocked `wait_for_condition` re-tests its predicate when
    /// no task completion wakes it first.
    #[serde(default = "default_condition_poll_interval_ms")]
    pub condition_poll_interval_ms: u64,

    /// Prefix for worker thread names (`{prefix}-{category}-{n}`).
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
}

fn default_short_task_workers() -> usize {
    0
}

fn default_long_task_workers() -> usize {
    2
}

fn default_file_access_workers() -> usize {
    1
}

fn default_max_extra_workers() -> usize {
    4
}

fn default_condition_poll_interval_ms() -> u64 {
    5
}

fn default_thread_name_prefix() -> String {
    "stupid-jobs".into()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            short_task_workers: default_short_task_workers(),
            long_task_workers: default_long_task_workers(),
            file_access_workers: default_file_access_workers(),
            max_extra_workers: default_max_extra_workers(),
            condition_poll_interval_ms: default_condition_poll_interval_ms(),
            thread_name_prefix: default_thread_name_prefix(),
        }
    }
}

// ── Loading & Validation ────────────────────────────────────────────

impl SchedulerConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, JobError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, JobError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self, JobError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Resolve the short-task worker count (0 means derive from the machine).
    pub fn resolved_short_task_workers(&self) -> usize {
        if self.short_task_workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get().saturating_sub(1).max(1))
                .unwrap_or(3)
        } else {
            self.short_task_workers
        }
    }

    /// Number of threads a category starts with.
    pub fn workers_for(&self, category: WorkerCategory) -> usize {
        match category {
            WorkerCategory::ShortTasks => self.resolved_short_task_workers(),
            WorkerCategory::LongTasks => self.long_task_workers,
            WorkerCategory::FileAccess => self.file_access_workers,
            WorkerCategory::MainThread => 0,
        }
    }

    /// Upper bound on threads a category may run, counting compensation workers.
    pub fn worker_ceiling(&self, category: WorkerCategory) -> usize {
        match category {
            WorkerCategory::MainThread => 0,
            other => self.workers_for(other) + self.max_extra_workers,
        }
    }

    pub fn condition_poll_interval(&self) -> Duration {
        Duration::from_millis(self.condition_poll_interval_ms)
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// Convention: `STUPID_JOBS_<FIELD>` overrides `<field>`:
    /// - `STUPID_JOBS_SHORT_TASK_WORKERS`
    /// - `STUPID_JOBS_LONG_TASK_WORKERS`
    /// - `STUPID_JOBS_FILE_ACCESS_WORKERS`
    /// - `STUPID_JOBS_MAX_EXTRA_WORKERS`
    /// - `STUPID_JOBS_CONDITION_POLL_INTERVAL_MS`
    /// - `STUPID_JOBS_THREAD_NAME_PREFIX`
    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("STUPID_JOBS_SHORT_TASK_WORKERS") {
            self.short_task_workers = v;
        }
        if let Some(v) = env_parse("STUPID_JOBS_LONG_TASK_WORKERS") {
            self.long_task_workers = v;
        }
        if let Some(v) = env_parse("STUPID_JOBS_FILE_ACCESS_WORKERS") {
            self.file_access_workers = v;
        }
        if let Some(v) = env_parse("STUPID_JOBS_MAX_EXTRA_WORKERS") {
            self.max_extra_workers = v;
        }
        if let Some(v) = env_parse("STUPID_JOBS_CONDITION_POLL_INTERVAL_MS") {
            self.condition_poll_interval_ms = v;
        }
        if let Ok(v) = std::env::var("STUPID_JOBS_THREAD_NAME_PREFIX") {
            if !v.is_empty() {
                self.thread_name_prefix = v;
            }
        }
    }

    // ── Validation ──────────────────────────────────────────────────

    /// Validate the config: every pooled category needs at least one thread,
    /// otherwise its lanes would never drain.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.long_task_workers == 0 {
            return Err(JobError::Config(
                "long_task_workers must be at least 1".into(),
            ));
        }
        if self.file_access_workers == 0 {
            return Err(JobError::Config(
                "file_access_workers must be at least 1".into(),
            ));
        }
        if self.condition_poll_interval_ms == 0 {
            return Err(JobError::Config(
                "condition_poll_interval_ms must be positive".into(),
            ));
        }
        if self.thread_name_prefix.trim().is_empty() {
            return Err(JobError::Config("thread_name_prefix must not be empty".into()));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
