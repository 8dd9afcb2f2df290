//! A named set of tasks executed with bounded parallelism.

use crate::task::{Task, TaskOutput, TaskOutputs};
use kiln_core::error::{Error, Result};
use kiln_docker::{ContainerRuntime, INVOCATION_EXIT_CODE};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Aggregated outcome of one step group.
#[derive(Debug, Clone)]
pub struct StepOutput {
    /// Maximum exit code over the group's tasks.
    pub exit_code: i32,
    pub logs: String,
}

#[derive(Debug, Clone)]
pub struct StepGroup {
    pub name: String,
    pub tasks: Vec<Task>,
    /// exit code -> name of a later step group
    pub branch: HashMap<i32, String>,
}

impl StepGroup {
    pub fn new(
        name: impl Into<String>,
        tasks: Vec<Task>,
        branch: HashMap<i32, String>,
    ) -> Result<Self> {
        let group = Self {
            name: name.into().trim().to_string(),
            tasks,
            branch,
        };
        group.validate()?;
        Ok(group)
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Validation("step group name cannot be empty".to_string()));
        }
        if self.tasks.is_empty() {
            return Err(Error::Validation(format!(
                "step group '{}' has no tasks",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for task in &self.tasks {
            if !seen.insert(task.tag.as_str()) {
                return Err(Error::Validation(format!(
                    "step group '{}' repeats task tag '{}'",
                    self.name, task.tag
                )));
            }
        }

        Ok(())
    }

    /// Executes every task, at most `semaphore`-many concurrently. Tasks
    /// start in declaration order and their logs are collected in completion
    /// order. The group always waits for all launched tasks, even when some
    /// fail; cancellation surfaces as [`Error::Cancelled`] once in-flight
    /// tasks have been released, carrying whatever logs were collected up to
    /// that point.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        semaphore: &Arc<Semaphore>,
        runtime: &Arc<dyn ContainerRuntime>,
    ) -> Result<StepOutput> {
        let mut set = JoinSet::new();

        for task in &self.tasks {
            let task = task.clone();
            let semaphore = Arc::clone(semaphore);
            let runtime = Arc::clone(runtime);
            let cancel = cancel.clone();

            set.spawn(async move { run_task(task, semaphore, runtime, cancel).await });
        }

        let mut outputs = TaskOutputs::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(output) => outputs.push(output),
                Err(err) => {
                    warn!(step = %self.name, error = %err, "task join failed");
                    outputs.push(TaskOutput {
                        exit_code: INVOCATION_EXIT_CODE,
                        log: format!("task aborted: {err}"),
                    });
                }
            }
        }

        let logs = format!("Step Group: {}\n{}\n\n", self.name, outputs.logs());

        if cancel.is_cancelled() {
            return Err(Error::Cancelled { logs });
        }

        Ok(StepOutput {
            exit_code: outputs.exit_code(),
            logs,
        })
    }
}

/// One task's slot-acquire-run cycle. Cancellation while waiting on the
/// semaphore means the task never starts; cancellation while running leaves
/// the container to the engine (the core does not kill containers) and
/// records the interruption.
async fn run_task(
    task: Task,
    semaphore: Arc<Semaphore>,
    runtime: Arc<dyn ContainerRuntime>,
    cancel: CancellationToken,
) -> TaskOutput {
    let _permit = tokio::select! {
        permit = semaphore.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(err) => {
                return TaskOutput {
                    exit_code: INVOCATION_EXIT_CODE,
                    log: format!(
                        "Task: {}\n\ncould not acquire semaphore lock to execute task: {err}",
                        task.name
                    ),
                };
            }
        },
        _ = cancel.cancelled() => {
            return TaskOutput {
                exit_code: INVOCATION_EXIT_CODE,
                log: format!(
                    "Task: {}\n\nsemaphore acquisition cancelled before task started",
                    task.name
                ),
            };
        }
    };

    tokio::select! {
        output = task.execute(runtime.as_ref()) => output,
        _ = cancel.cancelled() => TaskOutput {
            exit_code: INVOCATION_EXIT_CODE,
            log: format!("Task: {}\n\ntask cancelled before completion", task.name),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn task(tag: &str) -> Task {
        Task::new(
            "pull",
            "acme/etl:abc",
            tag,
            "python main.py",
            HashMap::new(),
            "/r",
            "/o",
        )
        .unwrap()
    }

    #[test]
    fn test_requires_name_and_tasks() {
        assert!(StepGroup::new("  ", vec![task("a")], HashMap::new()).is_err());
        assert!(StepGroup::new("extract", vec![], HashMap::new()).is_err());
    }

    #[test]
    fn test_rejects_duplicate_tags() {
        let group = StepGroup::new("extract", vec![task("a"), task("a")], HashMap::new());
        assert!(group.is_err());
    }

    #[test]
    fn test_accepts_unique_tags() {
        let group = StepGroup::new("extract", vec![task("a"), task("b")], HashMap::new());
        assert!(group.is_ok());
    }
}
