//! Repository materialization.
//!
//! Turns a source descriptor into a checked-out working tree, an available
//! container image, and a fully expanded step/task plan ready for execution.

mod dockerfile;
mod materializer;
mod steps;

pub use dockerfile::{DerivedDockerfile, derive_dockerfile};
pub use materializer::{Materializer, PreparedRepo};
pub use steps::{StepPlan, TaskPlan, expand_steps};
