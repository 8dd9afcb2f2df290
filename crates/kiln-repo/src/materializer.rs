//! Source materialization: clone-or-refresh, commit resolution, image
//! availability, step expansion.

use crate::dockerfile::derive_dockerfile;
use crate::steps::{StepPlan, expand_steps};
use kiln_core::config::Config;
use kiln_core::error::{Error, Result};
use kiln_core::ids::JobId;
use kiln_core::manifest::Manifest;
use kiln_core::source::Source;
use kiln_core::workspace::Workspace;
use kiln_docker::{BuildSpec, ContainerRuntime};
use kiln_git::{GitClient, Provider, authenticated_url};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

const DEFAULT_BRANCH: &str = "master";

/// A source resolved to a concrete working tree, image, and step plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRepo {
    /// The source's unique name; used as repo and task-group name.
    pub name: String,
    /// Clone directory, mounted into every task as `/repo`.
    pub dir: PathBuf,
    /// Fully qualified image reference `<name>:<commit>`.
    pub image: String,
    /// Resolved commit hash the tree is checked out at.
    pub commit: String,
    pub steps: Vec<StepPlan>,
}

pub struct Materializer {
    git: Arc<dyn GitClient>,
    runtime: Arc<dyn ContainerRuntime>,
    workspace: Workspace,
    provider: Provider,
    token: String,
    build_args: HashMap<String, String>,
}

impl Materializer {
    pub fn new(
        git: Arc<dyn GitClient>,
        runtime: Arc<dyn ContainerRuntime>,
        workspace: Workspace,
        config: &Config,
    ) -> Result<Self> {
        // A missing token downgrades any provider to anonymous access.
        let provider = if config.token.is_empty() {
            Provider::None
        } else {
            Provider::parse(&config.provider)?
        };

        Ok(Self {
            git,
            runtime,
            workspace,
            provider,
            token: config.token.clone(),
            build_args: config.build_args.clone(),
        })
    }

    /// Materializes `source` for `job_id`: ensures the local clone is
    /// current, parses the manifest, checks out the target commit, makes the
    /// image available, and expands the step plan.
    ///
    /// Repeating this for an unchanged source is a no-op beyond the
    /// remote-head comparison.
    pub async fn materialize(&self, source: &Source, job_id: JobId) -> Result<PreparedRepo> {
        self.workspace.ensure_repos_dir()?;
        let dir = self.workspace.repo_dir(&source.unique_name);

        self.refresh_clone(source, &dir).await?;

        let manifest = Manifest::load_from_dir(&dir)?;
        let commit = self.resolve_commit(source, &manifest, &dir).await?;
        self.git.checkout(&dir, &commit).await?;

        let image = format!("{}:{}", manifest.setup.image.trim(), commit);
        self.ensure_image(source, job_id, &manifest, &dir, &image).await?;

        let steps = expand_steps(&manifest, &source.unique_name, &image, &dir)?;

        Ok(PreparedRepo {
            name: source.unique_name.clone(),
            dir,
            image,
            commit,
            steps,
        })
    }

    /// Clones the repository when absent. When present, compares the remote
    /// head against the local one and re-clones from scratch on divergence;
    /// a matching head leaves the tree untouched.
    async fn refresh_clone(&self, source: &Source, dir: &std::path::Path) -> Result<()> {
        let url = authenticated_url(&source.repo_url, self.provider, &self.token);

        if !dir.exists() {
            info!(source = %source.unique_name, "cloning repository");
            return self.git.clone_repo(&url, dir).await;
        }

        let remote = self.git.remote_head(dir, DEFAULT_BRANCH).await?;
        let local = self.git.rev_parse(dir, DEFAULT_BRANCH).await?;
        if remote == local {
            debug!(source = %source.unique_name, "repository is current");
            return Ok(());
        }

        info!(source = %source.unique_name, "remote moved, recloning repository");
        std::fs::remove_dir_all(dir)
            .map_err(|e| Error::Git(format!("could not remove outdated repo: {e}")))?;
        self.git.clone_repo(&url, dir).await
    }

    /// Resolves the commit to check out. A pin on the source wins over the
    /// manifest pin; empty, `master`, and `latest` all mean current head.
    async fn resolve_commit(
        &self,
        source: &Source,
        manifest: &Manifest,
        dir: &std::path::Path,
    ) -> Result<String> {
        let pin = source
            .commit
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(manifest.setup.commit.trim());
        let pin = pin.to_lowercase();

        match pin.as_str() {
            "" | "master" | "latest" => self.git.rev_parse(dir, DEFAULT_BRANCH).await,
            reference => self.git.rev_parse_verify(dir, reference).await,
        }
    }

    /// Makes the image for this run available locally: builds it when the
    /// manifest asks for a build and it is absent, pulls it otherwise.
    /// Engine output is appended to the job's `image.txt`.
    async fn ensure_image(
        &self,
        source: &Source,
        job_id: JobId,
        manifest: &Manifest,
        dir: &std::path::Path,
        image: &str,
    ) -> Result<()> {
        if self.runtime.image_exists(image).await? {
            debug!(image, "image already present");
            return Ok(());
        }

        let logs = if manifest.setup.build {
            info!(image, "building image");
            let dockerfile =
                derive_dockerfile(manifest.setup.runtime, dir, &self.build_args).await?;
            let logs = self
                .runtime
                .image_build(&BuildSpec {
                    dockerfile: dockerfile.path,
                    context: dir.to_path_buf(),
                    tag: image.to_string(),
                    build_args: HashMap::new(),
                })
                .await?;
            format!("Building image for task group: {}\n\n{logs}", source.unique_name)
        } else {
            info!(image, "pulling image");
            let logs = self.runtime.image_pull(image).await?;
            format!("Pulling image for task group: {}\n\n{logs}", source.unique_name)
        };

        let mut log_file = self.workspace.image_log_file(source.id, job_id)?;
        log_file.append(&logs)?;
        Ok(())
    }
}
