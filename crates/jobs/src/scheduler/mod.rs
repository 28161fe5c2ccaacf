//! Group-dependency task scheduler.
//!
//! Split into focused submodules:
//! - `core`: Scheduler struct, construction, introspection and shutdown
//! - `lifecycle`: group creation, tasks, dependencies, start and the finish cascade
//! - `execution`: running invocations on workers, helpers and the main thread
//! - `wait`: blocking and cooperative waits
//! - `cancel`: two-phase cancellation of tasks and groups

mod cancel;
mod core;
mod execution;
mod lifecycle;
mod wait;
#[cfg(test)]
mod tests;

pub use self::core::Scheduler;
