//! Job scheduling and execution for Kiln.
//!
//! The [`Scheduler`] facade owns a [`Manager`], which owns the [`JobQueue`]
//! and the single active-worker slot. Each dispatched job runs a
//! [`TaskGroup`]: an ordered sequence of [`StepGroup`]s whose [`Task`]s
//! execute in bounded parallel inside containers.

mod manager;
mod queue;
mod scheduler;
mod stepgroup;
mod task;
mod taskgroup;

pub use manager::Manager;
pub use queue::JobQueue;
pub use scheduler::Scheduler;
pub use stepgroup::{StepGroup, StepOutput};
pub use task::{Task, TaskOutput, TaskOutputs};
pub use taskgroup::{ExecutionReport, TaskGroup};
