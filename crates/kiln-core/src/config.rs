//! Immutable runtime configuration.
//!
//! There is no process-global config lookup: a `Config` is built once at
//! startup and handed down through constructors.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the on-disk workspace (`repos/` and `jobs/` live under it).
    pub work_dir: PathBuf,
    /// Git credential provider tag: `github`, `gitlab-ci`, `gitlab-oauth2`
    /// or empty for anonymous access.
    pub provider: String,
    /// Personal access token matching `provider`.
    pub token: String,
    /// Per-job deadline. The job is cancelled and recorded as a failure
    /// once this much wall time has elapsed.
    pub max_job_duration: Duration,
    /// Build-time variables injected into derived Dockerfiles. Typically
    /// proxy settings that repository authors should not need to know about.
    pub build_args: HashMap<String, String>,
    /// How often the manager asks the store for due sources.
    pub poll_interval: Duration,
    /// How often the manager checks the queue for dispatchable work.
    pub dispatch_interval: Duration,
    /// Upper bound on concurrently executing tasks within one job.
    pub max_parallel_tasks: usize,
}

impl Config {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            provider: String::new(),
            token: String::new(),
            max_job_duration: Duration::from_secs(60 * 60),
            build_args: HashMap::new(),
            poll_interval: Duration::from_secs(10),
            dispatch_interval: Duration::from_secs(5),
            max_parallel_tasks: num_cpus::get(),
        }
    }
}
