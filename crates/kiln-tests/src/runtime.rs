//! Scripted container runtime double.
//!
//! Behaviors are keyed by substring of the container name (task tags embed
//! the task name, so a task's name is enough). A behavior can fail, sleep,
//! and drop a file into the host side of the `/output` mount the way a real
//! task container would.

use async_trait::async_trait;
use kiln_core::error::Result;
use kiln_docker::{
    BuildSpec, ContainerRuntime, ContainerSummary, RunOutput, RunSpec, StopSpec,
};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Behavior {
    pub exit_code: i32,
    pub sleep: Duration,
    pub logs: String,
    /// `(file name, content)` written into the `/output` mount.
    pub output_file: Option<(String, String)>,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            exit_code: 0,
            sleep: Duration::ZERO,
            logs: "done".to_string(),
            output_file: None,
        }
    }
}

impl Behavior {
    pub fn exit(code: i32) -> Self {
        Self { exit_code: code, ..Default::default() }
    }

    pub fn sleep(duration: Duration) -> Self {
        Self { sleep: duration, ..Default::default() }
    }

    pub fn writes(file: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            output_file: Some((file.into(), content.into())),
            ..Default::default()
        }
    }
}

#[derive(Default)]
pub struct FakeRuntime {
    behaviors: Mutex<Vec<(String, Behavior)>>,
    runs: Mutex<Vec<RunSpec>>,
    images: Mutex<HashSet<String>>,
    volumes: Mutex<HashSet<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    builds: AtomicUsize,
    pulls: AtomicUsize,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the behavior of every container whose name contains `key`.
    pub fn set_behavior(&self, key: impl Into<String>, behavior: Behavior) {
        self.behaviors.lock().unwrap().push((key.into(), behavior));
    }

    pub fn add_image(&self, reference: impl Into<String>) {
        self.images.lock().unwrap().insert(reference.into());
    }

    pub fn runs(&self) -> Vec<RunSpec> {
        self.runs.lock().unwrap().clone()
    }

    /// How many containers whose name contains `key` were run.
    pub fn run_count(&self, key: &str) -> usize {
        self.runs
            .lock()
            .unwrap()
            .iter()
            .filter(|spec| spec.name.contains(key))
            .count()
    }

    /// Highest number of concurrently running containers observed.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn pull_count(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    fn behavior_for(&self, name: &str) -> Behavior {
        self.behaviors
            .lock()
            .unwrap()
            .iter()
            .find(|(key, _)| name.contains(key.as_str()))
            .map(|(_, behavior)| behavior.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn run(&self, spec: &RunSpec) -> Result<RunOutput> {
        self.runs.lock().unwrap().push(spec.clone());
        let behavior = self.behavior_for(&spec.name);

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        if let Some((file, content)) = &behavior.output_file {
            let host_output = spec
                .volumes
                .iter()
                .find(|(_, container)| container.as_str() == "/output")
                .map(|(host, _)| host.clone());
            if let Some(dir) = host_output {
                std::fs::write(Path::new(&dir).join(file), content)?;
            }
        }

        if !behavior.sleep.is_zero() {
            tokio::time::sleep(behavior.sleep).await;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);

        Ok(RunOutput {
            exit_code: behavior.exit_code,
            logs: behavior.logs.clone(),
        })
    }

    async fn stop(&self, _spec: &StopSpec) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn list(&self) -> Result<Vec<ContainerSummary>> {
        Ok(Vec::new())
    }

    async fn image_exists(&self, reference: &str) -> Result<bool> {
        Ok(self.images.lock().unwrap().contains(reference))
    }

    async fn image_pull(&self, image: &str) -> Result<String> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        self.images.lock().unwrap().insert(image.to_string());
        Ok(format!("pulled {image}"))
    }

    async fn image_build(&self, spec: &BuildSpec) -> Result<String> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        self.images.lock().unwrap().insert(spec.tag.clone());
        Ok(format!("built {}", spec.tag))
    }

    async fn volume_create(&self, name: &str) -> Result<String> {
        self.volumes.lock().unwrap().insert(name.to_string());
        Ok(name.to_string())
    }

    async fn volume_exists(&self, name: &str) -> Result<bool> {
        Ok(self.volumes.lock().unwrap().contains(name))
    }

    async fn system_check(&self) -> Result<()> {
        Ok(())
    }
}
