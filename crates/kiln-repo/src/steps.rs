//! Expansion of the runtime manifest into concrete step and task plans.

use kiln_core::error::Result;
use kiln_core::manifest::Manifest;
use kiln_core::source::slug;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// One planned step: an ordered slot in the pipeline holding the tasks that
/// may run in parallel and the exit-code branch table.
#[derive(Debug, Clone, PartialEq)]
pub struct StepPlan {
    pub name: String,
    pub env: HashMap<String, String>,
    /// exit code -> name of a later step
    pub branch: HashMap<i32, String>,
    pub tasks: Vec<TaskPlan>,
}

/// One planned container execution.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskPlan {
    pub name: String,
    /// Container tag, unique within the repository:
    /// `<repo>__<step>__<task>` in lower-kebab parts.
    pub tag: String,
    pub image: String,
    pub cmd: String,
    pub env: HashMap<String, String>,
    pub work_dir: PathBuf,
}

/// Expands manifest steps, composing the environment with repository-global
/// values lowest, then per-step, then per-task.
pub fn expand_steps(
    manifest: &Manifest,
    repo_name: &str,
    image: &str,
    repo_dir: &Path,
) -> Result<Vec<StepPlan>> {
    let mut plans = Vec::with_capacity(manifest.steps.len());

    for step in &manifest.steps {
        let mut step_env = manifest.env.clone();
        step_env.extend(step.env.clone());

        let branch = step
            .branch
            .iter()
            .map(|rule| (rule.code, rule.step.clone()))
            .collect();

        let mut tasks = Vec::with_capacity(step.tasks.len());
        for task in &step.tasks {
            let mut env = step_env.clone();
            env.extend(task.env.clone());

            tasks.push(TaskPlan {
                name: task.name.clone(),
                tag: format!("{}__{}__{}", slug(repo_name), slug(&step.name), slug(&task.name)),
                image: image.to_string(),
                cmd: task.cmd.clone(),
                env,
                work_dir: repo_dir.to_path_buf(),
            });
        }

        plans.push(StepPlan {
            name: step.name.trim().to_string(),
            env: step_env,
            branch,
            tasks,
        });
    }

    Ok(plans)
}
