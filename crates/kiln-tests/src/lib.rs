//! Test doubles and fixtures shared by the Kiln integration tests.

pub mod fixtures;
pub mod git;
pub mod runtime;
pub mod store;

pub use git::FakeGit;
pub use runtime::{Behavior, FakeRuntime};
pub use store::MemoryStore;
