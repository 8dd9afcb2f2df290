//! Materializer behavior against scripted git and container gateways.

use kiln_core::error::Error;
use kiln_core::ids::JobId;
use kiln_core::workspace::Workspace;
use kiln_docker::ContainerRuntime;
use kiln_git::GitClient;
use kiln_repo::Materializer;
use kiln_tests::fixtures::{due_source, manifest_three_by_two, test_config};
use kiln_tests::{FakeGit, FakeRuntime};
use std::sync::Arc;
use tempfile::TempDir;

struct Harness {
    _tmp: TempDir,
    git: Arc<FakeGit>,
    runtime: Arc<FakeRuntime>,
    materializer: Materializer,
}

fn harness(manifest: String) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let workspace = Workspace::new(tmp.path()).unwrap();
    let git = Arc::new(FakeGit::new(manifest));
    let runtime = Arc::new(FakeRuntime::new());

    let materializer = Materializer::new(
        Arc::clone(&git) as Arc<dyn GitClient>,
        Arc::clone(&runtime) as Arc<dyn ContainerRuntime>,
        workspace,
        &config,
    )
    .unwrap();

    Harness { _tmp: tmp, git, runtime, materializer }
}

fn build_manifest() -> String {
    manifest_three_by_two().replace("build: false", "build: true")
}

#[tokio::test]
async fn test_materialize_expands_steps_and_image() {
    let h = harness(manifest_three_by_two());
    let source = due_source(1, "weather etl");

    let prepared = h.materializer.materialize(&source, JobId::new(1)).await.unwrap();

    assert_eq!(prepared.name, "weather-etl");
    assert_eq!(prepared.commit, h.git.head());
    assert_eq!(prepared.image, format!("acme/etl:{}", h.git.head()));
    assert_eq!(prepared.steps.len(), 3);
    assert_eq!(prepared.steps[0].tasks.len(), 2);
    assert_eq!(prepared.steps[0].tasks[0].tag, "weather-etl__extract__pull");
    assert_eq!(prepared.steps[0].tasks[0].env["region"], "eu-west-1");
    assert!(prepared.dir.ends_with("repos/weather-etl"));
}

#[tokio::test]
async fn test_unchanged_remote_is_idempotent() {
    let h = harness(build_manifest());
    let source = due_source(1, "weather etl");

    let first = h.materializer.materialize(&source, JobId::new(1)).await.unwrap();
    assert_eq!(h.git.clone_count(), 1);
    assert_eq!(h.runtime.build_count(), 1);

    let second = h.materializer.materialize(&source, JobId::new(2)).await.unwrap();
    assert_eq!(h.git.clone_count(), 1, "no re-clone when remote head is unchanged");
    assert_eq!(h.runtime.build_count(), 1, "no rebuild when image exists");
    assert_eq!(h.runtime.pull_count(), 0);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_remote_moved_forces_reclone_and_rebuild() {
    let h = harness(build_manifest());
    let source = due_source(1, "weather etl");

    h.materializer.materialize(&source, JobId::new(1)).await.unwrap();

    h.git.set_remote_head("f00dfeed");
    let prepared = h.materializer.materialize(&source, JobId::new(2)).await.unwrap();

    assert_eq!(h.git.clone_count(), 2);
    assert_eq!(h.runtime.build_count(), 2);
    assert_eq!(prepared.image, "acme/etl:f00dfeed");
}

#[tokio::test]
async fn test_pull_when_build_not_requested() {
    let h = harness(manifest_three_by_two());
    let source = due_source(1, "weather etl");

    h.materializer.materialize(&source, JobId::new(1)).await.unwrap();
    assert_eq!(h.runtime.pull_count(), 1);
    assert_eq!(h.runtime.build_count(), 0);

    h.materializer.materialize(&source, JobId::new(2)).await.unwrap();
    assert_eq!(h.runtime.pull_count(), 1, "image already present, no second pull");
}

#[tokio::test]
async fn test_commit_pin_must_be_known() {
    let h = harness(manifest_three_by_two().replace("commit: \"\"", "commit: deadbeef"));
    let source = due_source(1, "weather etl");

    let err = h.materializer.materialize(&source, JobId::new(1)).await;
    assert!(matches!(err, Err(Error::Git(_))));

    h.git.add_ref("deadbeef");
    let prepared = h.materializer.materialize(&source, JobId::new(2)).await.unwrap();
    assert_eq!(prepared.commit, "deadbeef");
    assert!(h.git.checkouts().contains(&"deadbeef".to_string()));
}

#[tokio::test]
async fn test_source_pin_overrides_manifest_pin() {
    let h = harness(manifest_three_by_two());
    let mut source = due_source(1, "weather etl");
    source.commit = Some("cafe0001".to_string());
    h.git.add_ref("cafe0001");

    let prepared = h.materializer.materialize(&source, JobId::new(1)).await.unwrap();
    assert_eq!(prepared.commit, "cafe0001");
    assert_eq!(prepared.image, "acme/etl:cafe0001");
}

#[tokio::test]
async fn test_missing_manifest_is_reported() {
    let h = harness(String::new());
    let source = due_source(1, "weather etl");

    let err = h.materializer.materialize(&source, JobId::new(1)).await;
    assert!(matches!(err, Err(Error::ManifestMissing)));
}

#[tokio::test]
async fn test_image_logs_are_written() {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let workspace = Workspace::new(tmp.path()).unwrap();
    let git = Arc::new(FakeGit::new(build_manifest()));
    let runtime = Arc::new(FakeRuntime::new());
    let materializer = Materializer::new(
        git as Arc<dyn GitClient>,
        runtime as Arc<dyn ContainerRuntime>,
        workspace.clone(),
        &config,
    )
    .unwrap();

    let source = due_source(1, "weather etl");
    materializer.materialize(&source, JobId::new(1)).await.unwrap();

    let image_log = workspace
        .job_dir(source.id, JobId::new(1))
        .unwrap()
        .join("image.txt");
    let content = std::fs::read_to_string(image_log).unwrap();
    assert!(content.contains("Building image for task group: weather-etl"));
}
