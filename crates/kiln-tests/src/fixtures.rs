//! Manifest and source fixtures for the integration tests.

use chrono::{DateTime, Timelike, Utc};
use kiln_core::config::Config;
use kiln_core::ids::SourceId;
use kiln_core::source::{Secret, Source};
use std::path::Path;
use std::time::Duration;

/// Hourly schedule at the top of the hour.
pub const HOURLY_CRON: &str = "0 0 * * * * *";

/// Three steps of two tasks each; the image is pulled, not built.
pub fn manifest_three_by_two() -> String {
    r#"
setup:
  build: false
  commit: ""
  image: acme/etl
environment:
  region: eu-west-1
steps:
  - step: extract
    tasks:
      - name: pull
        cmd: python pull.py
      - name: fetch
        cmd: python fetch.py
  - step: transform
    tasks:
      - name: clean
        cmd: python clean.py
      - name: join
        cmd: python join.py
  - step: load
    tasks:
      - name: push
        cmd: python push.py
      - name: verify
        cmd: python verify.py
"#
    .to_string()
}

/// A slow step followed by one that should never run once the job deadline
/// fires.
pub fn manifest_sleepy_then_after() -> String {
    r#"
setup:
  image: acme/etl
steps:
  - step: slow
    tasks:
      - name: sleepy
        cmd: python sleep.py
  - step: later
    tasks:
      - name: after
        cmd: python after.py
"#
    .to_string()
}

/// First step fails without any branch table entry.
pub fn manifest_failing() -> String {
    r#"
setup:
  image: acme/etl
steps:
  - step: explode
    tasks:
      - name: boom
        cmd: python boom.py
  - step: later
    tasks:
      - name: after
        cmd: python after.py
"#
    .to_string()
}

/// Steps a, b, c where a branches to c on exit code 1.
pub fn manifest_branching() -> String {
    r#"
setup:
  image: acme/etl
steps:
  - step: a
    branch:
      - code: 1
        step: c
    tasks:
      - name: trip
        cmd: python trip.py
  - step: b
    tasks:
      - name: skip
        cmd: python skip.py
  - step: c
    tasks:
      - name: finish
        cmd: python finish.py
"#
    .to_string()
}

/// A source due now: `next_fire` sits at the top of the current hour, so it
/// is in the past but its successor fire is in the future.
pub fn due_source(id: i64, name: &str) -> Source {
    let mut source = Source::new(
        SourceId::new(id),
        name,
        format!("https://github.com/acme/{}", name.replace(' ', "-")),
        HOURLY_CRON,
        top_of_hour(Utc::now()),
    )
    .unwrap();
    source.secrets = vec![Secret {
        key: "API_KEY".to_string(),
        value: "secret-value".to_string(),
    }];
    source
}

pub fn top_of_hour(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .expect("valid truncation")
}

/// A config with intervals tightened for tests.
pub fn test_config(work_dir: &Path) -> Config {
    let mut config = Config::new(work_dir);
    config.poll_interval = Duration::from_millis(50);
    config.dispatch_interval = Duration::from_millis(25);
    config.max_job_duration = Duration::from_secs(30);
    config.max_parallel_tasks = 4;
    config
}

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
