//! Seven-field cron schedule wrapper.
//!
//! Expressions follow the `second minute hour day-of-month month day-of-week
//! year` layout understood by the `cron` crate. A schedule whose consecutive
//! fires are ever closer than [`MIN_FIRE_INTERVAL`] is rejected at parse time
//! so a misconfigured source cannot saturate the worker slot.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

/// Minimum allowed gap between two consecutive fires, in seconds.
pub const MIN_FIRE_INTERVAL_SECS: i64 = 5 * 60;

/// Number of consecutive fire gaps inspected when validating an expression.
const VALIDATION_WINDOW: usize = 10;

#[derive(Debug, Clone)]
pub struct CronSchedule {
    expr: String,
    schedule: Schedule,
}

impl CronSchedule {
    /// Parses and validates a cron expression.
    pub fn parse(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        let schedule = Schedule::from_str(expr)
            .map_err(|e| Error::Validation(format!("invalid cron expression '{expr}': {e}")))?;

        let mut fires = schedule.upcoming(Utc);
        let mut prev = fires
            .next()
            .ok_or_else(|| Error::Validation(format!("cron expression '{expr}' never fires")))?;
        for next in fires.take(VALIDATION_WINDOW) {
            if (next - prev).num_seconds() < MIN_FIRE_INTERVAL_SECS {
                return Err(Error::Validation(format!(
                    "cron expression '{expr}' fires more often than every {} minutes",
                    MIN_FIRE_INTERVAL_SECS / 60
                )));
            }
            prev = next;
        }

        Ok(Self {
            expr: expr.to_string(),
            schedule,
        })
    }

    /// The next fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
        self.schedule.after(&after).next().ok_or_else(|| {
            Error::Validation(format!("cron expression '{}' has no upcoming fire", self.expr))
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }
}
