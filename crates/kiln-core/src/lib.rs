//! Kiln Core
//!
//! Core domain types, traits, and error handling for Kiln.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used across all other crates.

pub mod config;
pub mod error;
pub mod ids;
pub mod job;
pub mod manifest;
pub mod ports;
pub mod schedule;
pub mod source;
pub mod workspace;

pub use error::{Error, Result};
pub use ids::*;
