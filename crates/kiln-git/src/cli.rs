//! `git` CLI adapter for the [`GitClient`] port.

use crate::GitClient;
use async_trait::async_trait;
use kiln_core::error::{Error, Result};
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct GitCli;

impl GitCli {
    pub fn new() -> Self {
        Self
    }

    async fn exec(&self, dir: Option<&Path>, args: &[&str]) -> Result<String> {
        debug!(args = ?args, "invoking git");

        let mut cmd = Command::new("git");
        cmd.args(args);
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| Error::Git(format!("could not invoke git: {e}")))?;

        let mut logs = String::from_utf8_lossy(&output.stdout).into_owned();
        logs.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(Error::Git(format!(
                "git {} failed: {}",
                args.first().unwrap_or(&""),
                logs.trim()
            )));
        }

        Ok(logs)
    }
}

fn create_clone_dir(dir: &Path) -> Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o777);
    }
    builder.create(dir)?;
    Ok(())
}

#[async_trait]
impl GitClient for GitCli {
    async fn clone_repo(&self, url: &str, dir: &Path) -> Result<()> {
        if dir.exists() {
            let occupied = std::fs::read_dir(dir)?.next().is_some();
            if occupied {
                return Err(Error::Git(format!(
                    "clone target '{}' already exists and is not empty",
                    dir.display()
                )));
            }
        } else {
            create_clone_dir(dir)?;
        }

        self.exec(Some(dir), &["clone", url, "."]).await?;
        Ok(())
    }

    async fn remote_head(&self, dir: &Path, branch: &str) -> Result<String> {
        let output = self.exec(Some(dir), &["ls-remote", "origin", branch]).await?;
        output
            .split_whitespace()
            .next()
            .map(str::to_string)
            .ok_or_else(|| Error::Git(format!("remote has no head for branch '{branch}'")))
    }

    async fn rev_parse(&self, dir: &Path, reference: &str) -> Result<String> {
        let output = self.exec(Some(dir), &["rev-parse", reference]).await?;
        Ok(output.trim().to_string())
    }

    async fn rev_parse_verify(&self, dir: &Path, reference: &str) -> Result<String> {
        let output = self
            .exec(Some(dir), &["rev-parse", "--verify", reference])
            .await
            .map_err(|_| Error::Git(format!("'{reference}' is not a valid commit or tag")))?;

        let hash = output.trim();
        if hash.starts_with("fatal") {
            return Err(Error::Git(format!(
                "'{reference}' is not a valid commit or tag"
            )));
        }
        Ok(hash.to_string())
    }

    async fn checkout(&self, dir: &Path, reference: &str) -> Result<()> {
        let output = self.exec(Some(dir), &["checkout", reference]).await?;
        if output.trim_start().starts_with("error") {
            return Err(Error::Git(format!("could not checkout '{reference}'")));
        }
        Ok(())
    }

    async fn system_check(&self) -> Result<()> {
        self.exec(None, &["version"]).await.map(|_| ())
    }
}
