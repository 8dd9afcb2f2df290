//! Error types for Kiln.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Persistence errors
    #[error("store operation failed: {0}")]
    Store(String),

    // Git gateway errors
    #[error("git operation failed: {0}")]
    Git(String),

    // Runtime manifest errors
    #[error("no runtime.yaml found in repository root")]
    ManifestMissing,

    #[error("invalid runtime manifest: {0}")]
    Manifest(String),

    // Container runtime errors
    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    // Job execution errors
    #[error("step group '{step}' returned exit code {exit_code} which could not be handled")]
    UnhandledExitCode { step: String, exit_code: i32 },

    /// Carries the logs collected up to the point of cancellation so a
    /// cancelled run is not a silent one.
    #[error("job cancelled before completion")]
    Cancelled { logs: String },

    // Input errors
    #[error("validation failed: {0}")]
    Validation(String),

    // Infrastructure errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Io(std::io::Error::other(err))
    }
}
