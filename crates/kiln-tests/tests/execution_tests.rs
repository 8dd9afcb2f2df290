//! Step group and task group execution semantics against the scripted
//! container runtime.

use kiln_core::error::Error;
use kiln_core::ids::{JobId, SourceId};
use kiln_core::manifest::Manifest;
use kiln_docker::ContainerRuntime;
use kiln_repo::{PreparedRepo, expand_steps};
use kiln_scheduler::{StepGroup, Task, TaskGroup};
use kiln_tests::fixtures::{manifest_branching, manifest_failing, manifest_sleepy_then_after};
use kiln_tests::{Behavior, FakeRuntime};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

fn prepared(manifest_yaml: &str) -> PreparedRepo {
    let manifest = Manifest::from_yaml(manifest_yaml).unwrap();
    let steps = expand_steps(&manifest, "etl", "acme/etl:abc", Path::new("/tmp/repo")).unwrap();
    PreparedRepo {
        name: "etl".to_string(),
        dir: "/tmp/repo".into(),
        image: "acme/etl:abc".to_string(),
        commit: "abc".to_string(),
        steps,
    }
}

fn task_group(manifest_yaml: &str, runtime: &Arc<FakeRuntime>) -> TaskGroup {
    TaskGroup::new(
        &prepared(manifest_yaml),
        SourceId::new(1),
        JobId::new(1),
        "2020-01-01 00:00:00",
        "/tmp/out",
        4,
        Duration::from_secs(30),
        CancellationToken::new(),
        Arc::clone(runtime) as Arc<dyn ContainerRuntime>,
    )
    .unwrap()
}

fn plain_task(name: &str, tag: &str) -> Task {
    Task::new(
        name,
        "acme/etl:abc",
        tag,
        "python main.py",
        HashMap::new(),
        "/tmp/repo",
        "/tmp/out",
    )
    .unwrap()
}

#[tokio::test]
async fn test_step_group_exit_code_is_max_and_logs_in_completion_order() {
    let runtime = Arc::new(FakeRuntime::new());
    runtime.set_behavior(
        "slow",
        Behavior { sleep: Duration::from_millis(100), exit_code: 3, ..Default::default() },
    );

    let group = StepGroup::new(
        "mixed",
        vec![plain_task("slow", "slow_1"), plain_task("quick", "quick_1")],
        HashMap::new(),
    )
    .unwrap();

    let semaphore = Arc::new(Semaphore::new(4));
    let cancel = CancellationToken::new();
    let runtime_dyn: Arc<dyn ContainerRuntime> = Arc::clone(&runtime) as _;

    let output = group.execute(&cancel, &semaphore, &runtime_dyn).await.unwrap();

    assert_eq!(output.exit_code, 3);
    assert!(output.logs.starts_with("Step Group: mixed\n"));
    // the quick task finished first, so its log comes first
    assert!(output.logs.find("Task: quick").unwrap() < output.logs.find("Task: slow").unwrap());
    assert!(output.logs.contains(&"-".repeat(100)));
}

#[tokio::test]
async fn test_step_group_bounded_by_semaphore() {
    let runtime = Arc::new(FakeRuntime::new());
    runtime.set_behavior("t", Behavior::sleep(Duration::from_millis(100)));

    let tasks = (0..4).map(|i| plain_task("t", &format!("t{i}"))).collect();
    let group = StepGroup::new("wide", tasks, HashMap::new()).unwrap();

    let semaphore = Arc::new(Semaphore::new(2));
    let cancel = CancellationToken::new();
    let runtime_dyn: Arc<dyn ContainerRuntime> = Arc::clone(&runtime) as _;

    let start = Instant::now();
    let output = group.execute(&cancel, &semaphore, &runtime_dyn).await.unwrap();

    assert_eq!(output.exit_code, 0);
    assert!(runtime.max_concurrent() <= 2, "semaphore must bound parallelism");
    assert!(start.elapsed() >= Duration::from_millis(200), "4 tasks over 2 slots take 2 rounds");
}

#[tokio::test]
async fn test_step_group_waits_for_all_even_when_some_fail() {
    let runtime = Arc::new(FakeRuntime::new());
    runtime.set_behavior("fail", Behavior::exit(2));
    runtime.set_behavior("slow", Behavior::sleep(Duration::from_millis(100)));

    let group = StepGroup::new(
        "mixed",
        vec![plain_task("fail", "fail_1"), plain_task("slow", "slow_1")],
        HashMap::new(),
    )
    .unwrap();

    let semaphore = Arc::new(Semaphore::new(4));
    let cancel = CancellationToken::new();
    let runtime_dyn: Arc<dyn ContainerRuntime> = Arc::clone(&runtime) as _;

    let output = group.execute(&cancel, &semaphore, &runtime_dyn).await.unwrap();
    assert_eq!(output.exit_code, 2);
    assert_eq!(runtime.run_count("slow"), 1, "sibling task still ran to completion");
    assert!(output.logs.contains("Task: slow"));
}

#[tokio::test]
async fn test_task_group_zero_steps_completes_immediately() {
    let runtime = Arc::new(FakeRuntime::new());
    let group = TaskGroup::new(
        &PreparedRepo {
            name: "etl".to_string(),
            dir: "/tmp/repo".into(),
            image: "acme/etl:abc".to_string(),
            commit: "abc".to_string(),
            steps: vec![],
        },
        SourceId::new(1),
        JobId::new(1),
        "2020-01-01 00:00:00",
        "/tmp/out",
        4,
        Duration::from_secs(30),
        CancellationToken::new(),
        Arc::clone(&runtime) as Arc<dyn ContainerRuntime>,
    )
    .unwrap();

    let report = group.execute().await.unwrap();
    assert!(report.completed);
    assert!(report.logs.is_empty());
    assert!(report.steps.is_empty());
}

#[tokio::test]
async fn test_task_group_happy_path_runs_steps_in_order() {
    let runtime = Arc::new(FakeRuntime::new());
    let group = task_group(&manifest_branching(), &runtime);

    let report = group.execute().await.unwrap();
    assert!(report.completed);
    assert_eq!(report.steps, vec![0, 1, 2]);
    assert!(report.logs.starts_with("Task Group: etl\n"));
    assert!(report.logs.contains(&"=".repeat(100)));
    assert!(
        report.logs.find("Step Group: a").unwrap() < report.logs.find("Step Group: b").unwrap()
    );
}

#[tokio::test]
async fn test_task_group_branches_on_exit_code() {
    let runtime = Arc::new(FakeRuntime::new());
    runtime.set_behavior("trip", Behavior::exit(1));

    let group = task_group(&manifest_branching(), &runtime);
    let report = group.execute().await.unwrap();

    assert!(report.completed);
    assert_eq!(report.steps, vec![0, 2], "step b must be skipped");
    assert_eq!(runtime.run_count("skip"), 0);
    assert_eq!(runtime.run_count("finish"), 1);
}

#[tokio::test]
async fn test_task_group_unhandled_exit_code_is_fatal() {
    let runtime = Arc::new(FakeRuntime::new());
    runtime.set_behavior("boom", Behavior::exit(2));

    let group = task_group(&manifest_failing(), &runtime);
    match group.execute().await {
        Err(Error::UnhandledExitCode { step, exit_code }) => {
            assert_eq!(step, "explode");
            assert_eq!(exit_code, 2);
        }
        other => panic!("expected UnhandledExitCode, got {other:?}"),
    }
    assert_eq!(runtime.run_count("after"), 0, "later steps must not execute");
}

#[tokio::test]
async fn test_task_group_deadline_cancels_job() {
    let runtime = Arc::new(FakeRuntime::new());
    runtime.set_behavior("sleepy", Behavior::sleep(Duration::from_secs(5)));

    let mut group = task_group(&manifest_sleepy_then_after(), &runtime);
    group.set_deadline(Duration::from_millis(100));

    let start = Instant::now();
    match group.execute().await {
        Err(Error::Cancelled { logs }) => {
            // the interrupted step's partial record survives cancellation
            assert!(logs.starts_with("Task Group: etl\n"));
            assert!(logs.contains("Step Group: slow"));
            assert!(logs.contains("Task: sleepy"));
            assert!(logs.contains("cancelled"));
        }
        other => panic!("expected Cancelled, got {other:?}"),
    }
    assert!(start.elapsed() < Duration::from_secs(2), "deadline must cut the job short");
    assert_eq!(runtime.run_count("after"), 0);
}

#[tokio::test]
async fn test_task_group_root_cancellation() {
    let runtime = Arc::new(FakeRuntime::new());
    runtime.set_behavior("sleepy", Behavior::sleep(Duration::from_secs(5)));

    let cancel = CancellationToken::new();
    let group = TaskGroup::new(
        &prepared(&manifest_sleepy_then_after()),
        SourceId::new(1),
        JobId::new(1),
        "2020-01-01 00:00:00",
        "/tmp/out",
        4,
        Duration::from_secs(30),
        cancel.clone(),
        Arc::clone(&runtime) as Arc<dyn ContainerRuntime>,
    )
    .unwrap();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    match group.execute().await {
        Err(Error::Cancelled { logs }) => {
            assert!(logs.contains("Step Group: slow"));
            assert!(logs.contains("Task: sleepy"));
        }
        other => panic!("expected Cancelled, got {other:?}"),
    }
}

#[tokio::test]
async fn test_add_env_outranks_manifest_env_and_is_idempotent() {
    let manifest_yaml = r#"
setup:
  image: acme/etl
environment:
  key1: global
  key2: global
steps:
  - step: only
    environment:
      key1: step
    tasks:
      - name: work
        cmd: python work.py
        environment:
          key2: task
"#;
    let runtime = Arc::new(FakeRuntime::new());
    let mut group = task_group(manifest_yaml, &runtime);

    let overrides = HashMap::from([
        ("key1".to_string(), "override".to_string()),
        ("secret".to_string(), "value".to_string()),
    ]);
    group.add_env(&overrides);
    group.add_env(&overrides);

    let env = &group.step_groups()[0].tasks[0].env;
    assert_eq!(env["key1"], "override");
    assert_eq!(env["key2"], "task");
    assert_eq!(env["secret"], "value");
}
