use thiserror::Error;

use crate::types::TaskGroupId;

/// Errors raised while configuring or starting the scheduler.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("failed to spawn {category} worker #{index}: {source}")]
    WorkerSpawn {
        category: String,
        index: usize,
        source: std::io::Error,
    },
}

/// Cancellation could not complete because some work was already executing.
///
/// Running invocations are never aborted; the caller decides whether to
/// retry with [`CancelPolicy::WaitTillFinished`](crate::CancelPolicy::WaitTillFinished).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CancelError {
    #[error("task '{task}' is already running")]
    TaskRunning { task: String },

    #[error("{running} task(s) of {group} are already running")]
    TasksRunning { group: TaskGroupId, running: usize },
}
