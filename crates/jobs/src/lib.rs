//! In-process job scheduler with task groups, group dependencies, priority
//! lanes and category worker threads.
//!
//! ```no_run
//! use std::sync::Arc;
//! use stupid_jobs::{Priority, Scheduler, SchedulerConfig, Task};
//!
//! let scheduler = Scheduler::new(SchedulerConfig::default())?;
//!
//! let load = scheduler.create_task_group(Priority::High);
//! scheduler.add_task_to_group(load, Arc::new(Task::from_fn("load", |_| {})));
//!
//! let process = scheduler.create_task_group(Priority::Normal);
//! let chunks = Task::from_fn("process", |chunk| println!("chunk {chunk}")).with_multiplicity(8);
//! scheduler.add_task_to_group(process, Arc::new(chunks));
//! scheduler.add_task_group_dependency(process, load);
//!
//! scheduler.start_task_group(process);
//! scheduler.start_task_group(load);
//! scheduler.wait_for_group(process);
//! scheduler.shutdown();
//! # Ok::<(), stupid_jobs::JobError>(())
//! ```

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
mod group;
pub mod metrics;
pub mod pool;
mod queue;
pub mod scheduler;
pub mod task;
pub mod types;

pub use config::SchedulerConfig;
pub use dispatcher::{WorkerDispatcher, WorkerPool};
pub use error::{CancelError, JobError};
pub use group::OnFinished;
pub use metrics::SchedulerMetrics;
pub use pool::{ThreadPool, WorkerSlot, WorkerState};
pub use scheduler::Scheduler;
pub use task::{Job, Task, TaskNesting};
pub use types::{CancelPolicy, GroupStatus, Priority, TaskGroupId, WorkerCategory};
