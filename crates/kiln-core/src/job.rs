//! Job entity: one execution instance derived from a source.

use crate::error::{Error, Result};
use crate::ids::{JobId, SourceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Queued,
    Running,
    Success,
    Failure,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Queued => "QUEUED",
            JobState::Running => "RUNNING",
            JobState::Success => "SUCCESS",
            JobState::Failure => "FAILURE",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trigger {
    Schedule,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub source_id: SourceId,
    pub init_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub state: JobState,
    pub trigger: Trigger,
}

impl Job {
    pub fn new(id: JobId, source_id: SourceId, trigger: Trigger) -> Self {
        Self {
            id,
            source_id,
            init_time: Utc::now(),
            start_time: None,
            end_time: None,
            state: JobState::Queued,
            trigger,
        }
    }

    fn guard(&self, from: JobState, to: JobState) -> Result<()> {
        if self.state != from {
            return Err(Error::Validation(format!(
                "cannot reach '{to}' state from '{}' state",
                self.state
            )));
        }
        Ok(())
    }

    pub fn to_running(&mut self) -> Result<()> {
        self.guard(JobState::Queued, JobState::Running)?;
        self.start_time = Some(Utc::now());
        self.state = JobState::Running;
        Ok(())
    }

    pub fn to_success(&mut self) -> Result<()> {
        self.guard(JobState::Running, JobState::Success)?;
        self.end_time = Some(Utc::now());
        self.state = JobState::Success;
        Ok(())
    }

    pub fn to_failure(&mut self) -> Result<()> {
        self.guard(JobState::Running, JobState::Failure)?;
        self.end_time = Some(Utc::now());
        self.state = JobState::Failure;
        Ok(())
    }
}
