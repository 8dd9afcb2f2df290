//! The job-level state machine: an ordered sequence of step groups with
//! exit-code-driven, forward-only branching.

use crate::stepgroup::StepGroup;
use crate::task::Task;
use kiln_core::error::{Error, Result};
use kiln_core::ids::{JobId, SourceId};
use kiln_docker::ContainerRuntime;
use kiln_repo::PreparedRepo;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Outcome of a completed task group run. Only produced when every executed
/// step group resolved; failures surface as errors instead.
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub logs: String,
    pub completed: bool,
    /// Indices of step groups in execution order.
    pub steps: Vec<usize>,
}

pub struct TaskGroup {
    pub name: String,
    pub source_id: SourceId,
    pub job_id: JobId,
    /// Fire date of the run, `YYYY-MM-DD HH:MM:SS`.
    pub task_date: String,
    steps: Vec<StepGroup>,
    deadline: Duration,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    runtime: Arc<dyn ContainerRuntime>,
}

impl TaskGroup {
    /// Builds the runnable task group for one job from a materialized
    /// repository. `cancel` is the manager's token: cancelling it stops the
    /// job at the next step boundary or semaphore wait.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        prepared: &PreparedRepo,
        source_id: SourceId,
        job_id: JobId,
        task_date: impl Into<String>,
        output_dir: impl AsRef<Path>,
        parallelism: usize,
        deadline: Duration,
        cancel: CancellationToken,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Result<Self> {
        let output_dir = output_dir.as_ref();
        let mut steps = Vec::with_capacity(prepared.steps.len());

        for plan in &prepared.steps {
            let mut tasks = Vec::with_capacity(plan.tasks.len());
            for task in &plan.tasks {
                tasks.push(Task::new(
                    &task.name,
                    &task.image,
                    format!("{}_{}", task.tag, job_id),
                    &task.cmd,
                    task.env.clone(),
                    &task.work_dir,
                    output_dir,
                )?);
            }
            steps.push(StepGroup::new(&plan.name, tasks, plan.branch.clone())?);
        }

        let group = Self {
            name: prepared.name.clone(),
            source_id,
            job_id,
            task_date: task_date.into(),
            steps,
            deadline,
            semaphore: Arc::new(Semaphore::new(parallelism.max(1))),
            cancel,
            runtime,
        };
        group.validate()?;
        Ok(group)
    }

    fn validate(&self) -> Result<()> {
        if self.deadline.is_zero() {
            return Err(Error::Validation("job deadline must be positive".to_string()));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            for task in &step.tasks {
                if !seen.insert(task.tag.as_str()) {
                    return Err(Error::Validation(format!(
                        "task tag '{}' is repeated within the job",
                        task.tag
                    )));
                }
            }
        }
        Ok(())
    }

    /// Applies an environment override map to every task. Later calls with
    /// the same map are idempotent; these values outrank everything composed
    /// at materialization.
    pub fn add_env(&mut self, env: &HashMap<String, String>) -> &mut Self {
        for step in &mut self.steps {
            for task in &mut step.tasks {
                for (key, value) in env {
                    task.env.insert(key.clone(), value.clone());
                }
            }
        }
        self
    }

    pub fn set_deadline(&mut self, deadline: Duration) -> &mut Self {
        self.deadline = deadline;
        self
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn step_groups(&self) -> &[StepGroup] {
        &self.steps
    }

    /// Runs the step groups in cursor order under the job deadline.
    ///
    /// A zero exit advances the cursor; a non-zero exit consults the current
    /// group's branch table and jumps forward to the named group. A non-zero
    /// exit without a matching branch entry (or whose target is not a later
    /// group) fails the job. Branching is forward-only, so the loop
    /// terminates after at most `steps.len()` iterations.
    pub async fn execute(&self) -> Result<ExecutionReport> {
        let mut report = ExecutionReport::default();

        if self.steps.is_empty() {
            report.completed = true;
            return Ok(report);
        }

        let cancel = self.cancel.child_token();
        let deadline_token = cancel.clone();
        let deadline = self.deadline;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            deadline_token.cancel();
        });

        let result = self.run_steps(&cancel, &mut report).await;
        timer.abort();
        result?;

        Ok(report)
    }

    async fn run_steps(
        &self,
        cancel: &CancellationToken,
        report: &mut ExecutionReport,
    ) -> Result<()> {
        let mut logs = Vec::new();
        let mut index = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled { logs: format_logs(&self.name, &logs) });
            }

            report.steps.push(index);
            let group = &self.steps[index];
            info!(job = %self.job_id, step = %group.name, "executing step group");

            let output = match group.execute(cancel, &self.semaphore, &self.runtime).await {
                Ok(output) => output,
                // keep the interrupted group's partial record alongside the
                // groups that already finished
                Err(Error::Cancelled { logs: partial }) => {
                    logs.push(partial);
                    return Err(Error::Cancelled { logs: format_logs(&self.name, &logs) });
                }
                Err(err) => return Err(err),
            };
            logs.push(output.logs);

            match self.next_step(index, output.exit_code)? {
                Some(next) => index = next,
                None => break,
            }
        }

        report.completed = true;
        report.logs = format_logs(&self.name, &logs);
        Ok(())
    }

    fn next_step(&self, index: usize, exit_code: i32) -> Result<Option<usize>> {
        if exit_code == 0 {
            if index + 1 == self.steps.len() {
                return Ok(None);
            }
            return Ok(Some(index + 1));
        }

        let group = &self.steps[index];
        let unhandled = || Error::UnhandledExitCode {
            step: group.name.clone(),
            exit_code,
        };

        let target = group.branch.get(&exit_code).ok_or_else(unhandled)?;
        self.steps[index + 1..]
            .iter()
            .position(|later| later.name == *target)
            .map(|offset| Some(index + 1 + offset))
            .ok_or_else(unhandled)
    }
}

fn format_logs(name: &str, logs: &[String]) -> String {
    let separator = format!("\n{}\n", "=".repeat(100));
    format!("Task Group: {name}\n{}", logs.join(&separator))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_logs_uses_equals_rule() {
        let logs = vec!["Step Group: a\n".to_string(), "Step Group: b\n".to_string()];
        let formatted = format_logs("etl", &logs);
        assert!(formatted.starts_with("Task Group: etl\n"));
        assert!(formatted.contains(&"=".repeat(100)));
        assert!(formatted.find("Step Group: a").unwrap() < formatted.find("Step Group: b").unwrap());
    }
}
