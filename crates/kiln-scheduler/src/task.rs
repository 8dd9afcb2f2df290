//! A single container execution unit.

use kiln_core::error::{Error, Result};
use kiln_docker::{ContainerRuntime, INVOCATION_EXIT_CODE, RunSpec};
use std::collections::HashMap;
use std::path::PathBuf;

/// Rule separating task logs within a step group.
fn task_log_separator() -> String {
    format!("\n\n{}\n\n", "-".repeat(100))
}

#[derive(Debug, Clone)]
pub struct Task {
    pub name: String,
    /// Fully qualified image reference to run.
    pub image: String,
    /// Container name; unique within the job.
    pub tag: String,
    /// Whitespace-tokenized at execution time.
    pub cmd: String,
    pub env: HashMap<String, String>,
    /// Clone tree, mounted at `/repo`.
    pub work_dir: PathBuf,
    /// Job output directory, mounted at `/output`.
    pub output_dir: PathBuf,
}

impl Task {
    pub fn new(
        name: impl Into<String>,
        image: impl Into<String>,
        tag: impl Into<String>,
        cmd: impl Into<String>,
        env: HashMap<String, String>,
        work_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let task = Self {
            name: name.into().trim().to_string(),
            image: image.into(),
            tag: tag.into(),
            cmd: cmd.into(),
            env,
            work_dir: work_dir.into(),
            output_dir: output_dir.into(),
        };

        for (field, value) in [
            ("task name", task.name.as_str()),
            ("image", task.image.as_str()),
            ("task tag", task.tag.as_str()),
            ("command", task.cmd.as_str()),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Validation(format!("{field} cannot be empty")));
            }
        }
        if task.output_dir.as_os_str().is_empty() {
            return Err(Error::Validation("output directory cannot be empty".to_string()));
        }

        Ok(task)
    }

    /// Runs the task container to completion. Runtime invocation failures do
    /// not bubble: they become the synthetic exit code with the error text
    /// as the log body, so a broken engine mid-job degrades into an
    /// ordinary failed task.
    pub async fn execute(&self, runtime: &dyn ContainerRuntime) -> TaskOutput {
        let spec = RunSpec {
            image: self.image.clone(),
            name: self.tag.clone(),
            restart: "no".to_string(),
            env: self.env.clone(),
            cmd: self.cmd.split_whitespace().map(str::to_string).collect(),
            volumes: HashMap::from([
                (self.work_dir.display().to_string(), "/repo".to_string()),
                (self.output_dir.display().to_string(), "/output".to_string()),
            ]),
            work_dir: Some(self.work_dir.clone()),
            ..Default::default()
        };

        let (exit_code, body) = match runtime.run(&spec).await {
            Ok(output) => (output.exit_code, output.logs),
            Err(err) => (INVOCATION_EXIT_CODE, err.to_string()),
        };

        TaskOutput {
            exit_code,
            log: format!("Task: {}\n\n{}", self.name, body.trim()).trim().to_string(),
        }
    }
}

/// Captured outcome of one task.
#[derive(Debug, Clone)]
pub struct TaskOutput {
    pub exit_code: i32,
    pub log: String,
}

/// Accumulates task outputs in completion order.
#[derive(Debug, Default)]
pub struct TaskOutputs {
    outputs: Vec<TaskOutput>,
}

impl TaskOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, output: TaskOutput) {
        self.outputs.push(output);
    }

    /// The group's exit code: the maximum over all task exit codes.
    pub fn exit_code(&self) -> i32 {
        self.outputs.iter().map(|o| o.exit_code).max().unwrap_or(0)
    }

    pub fn logs(&self) -> String {
        let logs: Vec<&str> = self.outputs.iter().map(|o| o.log.as_str()).collect();
        logs.join(&task_log_separator())
    }
}
