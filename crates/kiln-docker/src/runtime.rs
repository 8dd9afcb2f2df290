//! The container runtime port and its request/response types.

use async_trait::async_trait;
use kiln_core::error::{Error, Result};
use std::collections::HashMap;
use std::path::PathBuf;

/// Synthetic exit code used when a container process yields no real one,
/// for example when it was killed by a signal or never started.
pub const INVOCATION_EXIT_CODE: i32 = 999;

/// One container execution request.
#[derive(Debug, Clone, Default)]
pub struct RunSpec {
    pub image: String,
    /// Optional image tag; appended as `image:tag` when set.
    pub tag: String,
    /// Container name. Must not contain whitespace.
    pub name: String,
    /// Docker restart policy. Empty defaults to `unless-stopped`; `no`
    /// additionally auto-removes the container on exit.
    pub restart: String,
    pub env: HashMap<String, String>,
    pub cmd: Vec<String>,
    /// host port -> container port
    pub ports: HashMap<u16, u16>,
    /// host path -> container path
    pub volumes: HashMap<String, String>,
    pub daemon: bool,
    pub network: String,
    pub work_dir: Option<PathBuf>,
}

impl RunSpec {
    /// The `image[:tag]` reference, validating the container name along the
    /// way. A name with embedded whitespace would silently split into extra
    /// arguments, so it is rejected here.
    pub fn image_reference(&self) -> Result<String> {
        let image = self.image.trim();
        if image.is_empty() {
            return Err(Error::Validation("image not specified".to_string()));
        }

        if self.name.split_whitespace().count() > 1 {
            return Err(Error::Validation(format!(
                "invalid container name '{}'",
                self.name
            )));
        }

        let tag = self.tag.trim();
        if tag.is_empty() {
            Ok(image.to_string())
        } else {
            Ok(format!("{image}:{tag}"))
        }
    }
}

/// Captured outcome of one container run. A non-zero `exit_code` is data,
/// not an error: the step state machine branches on it.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub exit_code: i32,
    pub logs: String,
}

/// Selects containers to stop by exact name or published host port.
#[derive(Debug, Clone, Default)]
pub struct StopSpec {
    pub name: Option<String>,
    pub port: Option<u16>,
    /// Swallow lookup failures instead of surfacing them.
    pub ignore_not_found: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub names: Vec<String>,
    /// Published host ports.
    pub ports: Vec<u16>,
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct BuildSpec {
    pub dockerfile: PathBuf,
    pub context: PathBuf,
    pub tag: String,
    pub build_args: HashMap<String, String>,
}

/// Port over an external container engine.
///
/// Adapters never retry: transient engine failures surface as
/// [`Error::RuntimeUnavailable`] and the caller decides what to do.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Runs a container to completion (or detaches when `daemon` is set),
    /// returning the exit code and combined stdout/stderr.
    async fn run(&self, spec: &RunSpec) -> Result<RunOutput>;

    /// Force-removes containers matched by name or published host port and
    /// returns their ids.
    async fn stop(&self, spec: &StopSpec) -> Result<Vec<String>>;

    /// Lists all containers, running or not.
    async fn list(&self) -> Result<Vec<ContainerSummary>>;

    /// Whether `reference` (`name` or `name:tag`) exists locally.
    async fn image_exists(&self, reference: &str) -> Result<bool>;

    /// Pulls an image, returning the engine's pull log.
    async fn image_pull(&self, image: &str) -> Result<String>;

    /// Builds an image, returning the engine's build log.
    async fn image_build(&self, spec: &BuildSpec) -> Result<String>;

    async fn volume_create(&self, name: &str) -> Result<String>;

    async fn volume_exists(&self, name: &str) -> Result<bool>;

    /// Cheap probe that the engine is invokable at all. Fatal at startup,
    /// recoverable per-operation afterwards.
    async fn system_check(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_reference_with_tag() {
        let spec = RunSpec {
            image: "acme/etl".into(),
            tag: "abc123".into(),
            name: "etl_1".into(),
            ..Default::default()
        };
        assert_eq!(spec.image_reference().unwrap(), "acme/etl:abc123");
    }

    #[test]
    fn test_image_reference_without_tag() {
        let spec = RunSpec {
            image: " postgres ".into(),
            ..Default::default()
        };
        assert_eq!(spec.image_reference().unwrap(), "postgres");
    }

    #[test]
    fn test_empty_image_rejected() {
        let spec = RunSpec::default();
        assert!(spec.image_reference().is_err());
    }

    #[test]
    fn test_whitespace_name_rejected() {
        let spec = RunSpec {
            image: "postgres".into(),
            name: "bad name".into(),
            ..Default::default()
        };
        assert!(spec.image_reference().is_err());
    }
}
