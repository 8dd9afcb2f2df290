//! Runtime manifest types.
//!
//! Every repository a source points at declares its pipeline in a
//! `runtime.yaml` (or `runtime.yml`) at the repository root. The manifest is
//! parsed once per job and never persisted.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Names the Dockerfile derivation strategy used when `setup.build` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeFamily {
    /// The repository carries its own `Dockerfile`.
    #[default]
    Dockerfile,
    /// A python template Dockerfile is fetched and specialized.
    Python,
    /// An R template Dockerfile is fetched and specialized.
    R,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setup {
    #[serde(default)]
    pub build: bool,
    #[serde(default)]
    pub commit: String,
    pub image: String,
    #[serde(default)]
    pub runtime: RuntimeFamily,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchRule {
    pub code: i32,
    pub step: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestTask {
    pub name: String,
    pub cmd: String,
    #[serde(default, rename = "environment")]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestStep {
    #[serde(rename = "step")]
    pub name: String,
    #[serde(default, rename = "environment")]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub branch: Vec<BranchRule>,
    pub tasks: Vec<ManifestTask>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub setup: Setup,
    #[serde(default, rename = "environment")]
    pub env: HashMap<String, String>,
    pub steps: Vec<ManifestStep>,
}

impl Manifest {
    pub fn from_yaml(content: &str) -> Result<Self> {
        let manifest: Manifest = serde_yaml::from_str(content)
            .map_err(|e| Error::Manifest(format!("could not decode yaml file: {e}")))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Locates `runtime.yaml` / `runtime.yml` (case-insensitive) in `dir` and
    /// parses it. Missing manifest is a distinct error so the materializer
    /// can report it precisely.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| Error::Manifest(format!("could not read repository directory: {e}")))?;

        let mut file = None;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_lowercase();
            if entry.path().is_file() && (name == "runtime.yaml" || name == "runtime.yml") {
                file = Some(entry.path());
            }
        }

        let Some(path) = file else {
            return Err(Error::ManifestMissing);
        };

        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::Manifest(format!("could not read manifest content: {e}")))?;
        Self::from_yaml(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.setup.image.trim().is_empty() {
            return Err(Error::Manifest("setup.image cannot be empty".to_string()));
        }

        if self.steps.is_empty() {
            return Err(Error::Manifest(
                "manifest must declare at least one step".to_string(),
            ));
        }

        for (index, step) in self.steps.iter().enumerate() {
            if step.name.trim().is_empty() {
                return Err(Error::Manifest(format!("step {index} has an empty name")));
            }

            if step.tasks.is_empty() {
                return Err(Error::Manifest(format!(
                    "step '{}' has no tasks",
                    step.name
                )));
            }

            let mut seen = HashSet::new();
            for task in &step.tasks {
                if task.name.trim().is_empty() {
                    return Err(Error::Manifest(format!(
                        "step '{}' has a task with an empty name",
                        step.name
                    )));
                }
                if !seen.insert(task.name.trim()) {
                    return Err(Error::Manifest(format!(
                        "step '{}' repeats task name '{}'",
                        step.name, task.name
                    )));
                }
            }

            // Branch targets must name a later step. Backward jumps would
            // allow non-terminating pipelines, so they are rejected here
            // rather than at execution time.
            for rule in &step.branch {
                let target_is_later = self.steps[index + 1..]
                    .iter()
                    .any(|later| later.name == rule.step);
                if !target_is_later {
                    return Err(Error::Manifest(format!(
                        "step '{}' branches on exit code {} to '{}' which is not a later step",
                        step.name, rule.code, rule.step
                    )));
                }
            }
        }

        Ok(())
    }
}
