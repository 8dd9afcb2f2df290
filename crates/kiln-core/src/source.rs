//! Source entity: a declared upstream repository plus its schedule.

use crate::error::{Error, Result};
use crate::ids::SourceId;
use crate::schedule::CronSchedule;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Format used for the injected `task_date` value and for `meta.json`.
pub const TASK_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Environment key under which the fire date is injected into every task.
pub const TASK_DATE_KEY: &str = "task_date";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceState {
    Noop,
    Queued,
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub name: String,
    pub unique_name: String,
    pub repo_url: String,
    pub cron_expr: String,
    pub next_fire: DateTime<Utc>,
    pub state: SourceState,
    pub secrets: Vec<Secret>,
    /// Optional commit pin. When set it overrides the pin declared in the
    /// repository's runtime manifest.
    pub commit: Option<String>,
}

fn repo_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^https?://\S+$").expect("valid regex"))
}

/// Lower-kebab form of a display name: trimmed, lowercased, internal
/// whitespace collapsed to single dashes.
pub fn slug(s: &str) -> String {
    s.trim().to_lowercase().split_whitespace().collect::<Vec<_>>().join("-")
}

impl Source {
    pub fn new(
        id: SourceId,
        name: impl Into<String>,
        repo_url: impl Into<String>,
        cron_expr: impl Into<String>,
        next_fire: DateTime<Utc>,
    ) -> Result<Self> {
        let name = name.into().trim().to_string();
        let source = Self {
            id,
            unique_name: slug(&name),
            name,
            repo_url: repo_url.into(),
            cron_expr: cron_expr.into(),
            next_fire,
            state: SourceState::Noop,
            secrets: Vec::new(),
            commit: None,
        };
        source.validate()?;
        Ok(source)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().len() < 4 {
            return Err(Error::Validation(
                "name length must be >= 4 characters".to_string(),
            ));
        }

        if !repo_url_regex().is_match(&self.repo_url) {
            return Err(Error::Validation(format!(
                "expected '{}' git remote to be accessible through http",
                self.repo_url
            )));
        }

        CronSchedule::parse(&self.cron_expr)?;
        Ok(())
    }

    pub fn to_queued(&mut self) {
        self.state = SourceState::Queued;
    }

    pub fn to_running(&mut self) {
        self.state = SourceState::Running;
    }

    /// Marks the source idle again and advances `next_fire` to the fire
    /// strictly after the previous one.
    pub fn to_completed(&mut self) -> Result<()> {
        let schedule = CronSchedule::parse(&self.cron_expr)?;
        self.next_fire = schedule.next_after(self.next_fire)?;
        self.state = SourceState::Noop;
        Ok(())
    }

    /// The fire date of the current run, formatted for env injection.
    pub fn task_date(&self) -> String {
        self.next_fire.format(TASK_DATE_FORMAT).to_string()
    }

    pub fn secret_map(&self) -> HashMap<String, String> {
        self.secrets
            .iter()
            .map(|s| (s.key.clone(), s.value.clone()))
            .collect()
    }

    /// Replaces every secret value with an equal-length run of `*`.
    pub fn mask_secrets(&mut self) {
        for secret in &mut self.secrets {
            secret.value = "*".repeat(secret.value.len());
        }
    }
}
