//! `docker` CLI adapter for the [`ContainerRuntime`] port.

use crate::runtime::{
    BuildSpec, ContainerRuntime, ContainerSummary, INVOCATION_EXIT_CODE, RunOutput, RunSpec,
    StopSpec,
};
use async_trait::async_trait;
use kiln_core::error::{Error, Result};
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

const LIST_SEP: &str = "::";

#[derive(Debug, Clone, Default)]
pub struct DockerCli;

impl DockerCli {
    pub fn new() -> Self {
        Self
    }

    /// Invokes `docker` with the given arguments, capturing stdout and
    /// stderr. Failure to spawn the binary at all is the
    /// `RuntimeUnavailable` case; a non-zero exit is reported through the
    /// returned code.
    async fn exec(&self, args: &[String], work_dir: Option<&Path>) -> Result<(i32, String)> {
        debug!(args = ?args, "invoking docker");

        let mut cmd = Command::new("docker");
        cmd.args(args);
        if let Some(dir) = work_dir {
            if dir.exists() {
                cmd.current_dir(dir);
            }
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| Error::RuntimeUnavailable(format!("could not invoke docker: {e}")))?;

        let mut logs = String::from_utf8_lossy(&output.stdout).into_owned();
        logs.push_str(&String::from_utf8_lossy(&output.stderr));

        let code = output.status.code().unwrap_or(INVOCATION_EXIT_CODE);
        Ok((code, logs))
    }

    /// Like [`exec`] but treats a non-zero exit as an error carrying the
    /// combined output. Used for the operations where a failure is not
    /// meaningful data.
    async fn exec_ok(&self, args: &[String], work_dir: Option<&Path>) -> Result<String> {
        let (code, logs) = self.exec(args, work_dir).await?;
        if code != 0 {
            return Err(Error::RuntimeUnavailable(format!(
                "docker {} exited with code {code}: {}",
                args.first().map(String::as_str).unwrap_or(""),
                logs.trim()
            )));
        }
        Ok(logs)
    }
}

/// Builds the `docker container run` argument vector for a spec. Map-valued
/// options are emitted in sorted key order so invocations are reproducible.
fn run_args(spec: &RunSpec) -> Result<Vec<String>> {
    let mut args: Vec<String> = vec!["container".into(), "run".into()];

    if spec.daemon {
        args.push("-d".into());
    }

    let mut env: Vec<_> = spec.env.iter().collect();
    env.sort();
    for (key, value) in env {
        args.push("-e".into());
        args.push(format!("{key}={value}"));
    }

    let mut volumes: Vec<_> = spec.volumes.iter().collect();
    volumes.sort();
    for (src, dest) in volumes {
        args.push("-v".into());
        args.push(format!("{src}:{dest}"));
    }

    let mut ports: Vec<_> = spec.ports.iter().collect();
    ports.sort();
    for (host, target) in ports {
        args.push("-p".into());
        args.push(format!("{host}:{target}"));
    }

    if !spec.name.trim().is_empty() {
        args.push("--name".into());
        args.push(spec.name.clone());
    }

    if !spec.network.trim().is_empty() {
        args.push("--network".into());
        args.push(spec.network.clone());
    }

    let restart = spec.restart.trim();
    if restart.is_empty() {
        args.push("--restart".into());
        args.push("unless-stopped".into());
    } else {
        args.push("--restart".into());
        args.push(restart.to_string());
        if restart == "no" {
            args.push("--rm".into());
        }
    }

    args.push(spec.image_reference()?);
    args.extend(spec.cmd.iter().cloned());

    Ok(args)
}

/// Parses `docker container list` output formatted as
/// `{{.Names}}::{{.Ports}}::{{.ID}}`.
fn parse_containers(output: &str) -> Vec<ContainerSummary> {
    let mut summaries = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split(LIST_SEP).collect();
        if parts.len() != 3 {
            continue;
        }

        let names = parts[0]
            .split(',')
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();

        // Port publications look like `0.0.0.0:8080->80/tcp`; only the host
        // side matters for stop-by-port matching.
        let mut ports = Vec::new();
        for publication in parts[1].split(',') {
            let Some((host_addr, _)) = publication.split_once("->") else {
                continue;
            };
            if let Some((_, port)) = host_addr.rsplit_once(':') {
                if let Ok(port) = port.trim().parse() {
                    ports.push(port);
                }
            }
        }

        summaries.push(ContainerSummary {
            names,
            ports,
            id: parts[2].trim().to_string(),
        });
    }

    summaries
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn run(&self, spec: &RunSpec) -> Result<RunOutput> {
        let args = run_args(spec)?;
        let (exit_code, logs) = self.exec(&args, spec.work_dir.as_deref()).await?;
        Ok(RunOutput { exit_code, logs })
    }

    async fn stop(&self, spec: &StopSpec) -> Result<Vec<String>> {
        let containers = match self.list().await {
            Ok(containers) => containers,
            Err(_) if spec.ignore_not_found => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let matches: Vec<String> = containers
            .into_iter()
            .filter(|c| {
                let by_name = spec
                    .name
                    .as_deref()
                    .is_some_and(|name| c.names.iter().any(|n| n == name));
                let by_port = spec.port.is_some_and(|port| c.ports.contains(&port));
                by_name || by_port
            })
            .map(|c| c.id)
            .collect();

        let mut stopped = Vec::new();
        for id in matches {
            self.exec_ok(
                &["container".into(), "rm".into(), "-f".into(), id.clone()],
                None,
            )
            .await
            .map_err(|e| Error::RuntimeUnavailable(format!("could not stop container '{id}': {e}")))?;
            stopped.push(id);
        }

        Ok(stopped)
    }

    async fn list(&self) -> Result<Vec<ContainerSummary>> {
        let format = format!("{{{{.Names}}}}{LIST_SEP}{{{{.Ports}}}}{LIST_SEP}{{{{.ID}}}}");
        let output = self
            .exec_ok(
                &[
                    "container".into(),
                    "list".into(),
                    "-a".into(),
                    "--format".into(),
                    format,
                ],
                None,
            )
            .await?;
        Ok(parse_containers(&output))
    }

    async fn image_exists(&self, reference: &str) -> Result<bool> {
        let format = if reference.contains(':') {
            "{{.Repository}}:{{.Tag}}"
        } else {
            "{{.Repository}}"
        };
        let output = self
            .exec_ok(
                &[
                    "image".into(),
                    "list".into(),
                    "--format".into(),
                    format.into(),
                ],
                None,
            )
            .await?;

        Ok(output.lines().any(|line| line.trim() == reference))
    }

    async fn image_pull(&self, image: &str) -> Result<String> {
        self.exec_ok(&["image".into(), "pull".into(), image.into()], None)
            .await
    }

    async fn image_build(&self, spec: &BuildSpec) -> Result<String> {
        let mut args: Vec<String> = vec![
            "image".into(),
            "build".into(),
            "-f".into(),
            spec.dockerfile.display().to_string(),
            "--tag".into(),
            spec.tag.clone(),
        ];

        let mut build_args: Vec<_> = spec.build_args.iter().collect();
        build_args.sort();
        for (key, value) in build_args {
            args.push("--build-arg".into());
            args.push(format!("{key}={value}"));
        }

        args.push(".".into());

        self.exec_ok(&args, Some(&spec.context)).await
    }

    async fn volume_create(&self, name: &str) -> Result<String> {
        self.exec_ok(&["volume".into(), "create".into(), name.into()], None)
            .await
    }

    async fn volume_exists(&self, name: &str) -> Result<bool> {
        let output = self
            .exec_ok(
                &[
                    "volume".into(),
                    "list".into(),
                    "--format".into(),
                    "{{.Name}}".into(),
                ],
                None,
            )
            .await?;
        Ok(output.lines().any(|line| line.trim() == name))
    }

    async fn system_check(&self) -> Result<()> {
        self.exec_ok(&["version".into()], None).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_run_args_full() {
        let spec = RunSpec {
            image: "acme/etl".into(),
            tag: "abc".into(),
            name: "etl__extract__pull_1".into(),
            restart: "no".into(),
            env: HashMap::from([("B".into(), "2".into()), ("A".into(), "1".into())]),
            cmd: vec!["python".into(), "main.py".into()],
            ports: HashMap::from([(8080, 80)]),
            volumes: HashMap::from([("/work/repo".into(), "/repo".into())]),
            daemon: false,
            network: String::new(),
            work_dir: None,
        };

        let args = run_args(&spec).unwrap();
        assert_eq!(
            args,
            vec![
                "container",
                "run",
                "-e",
                "A=1",
                "-e",
                "B=2",
                "-v",
                "/work/repo:/repo",
                "-p",
                "8080:80",
                "--name",
                "etl__extract__pull_1",
                "--restart",
                "no",
                "--rm",
                "acme/etl:abc",
                "python",
                "main.py",
            ]
        );
    }

    #[test]
    fn test_run_args_default_restart() {
        let spec = RunSpec {
            image: "postgres".into(),
            daemon: true,
            ..Default::default()
        };
        let args = run_args(&spec).unwrap();
        assert_eq!(
            args,
            vec!["container", "run", "-d", "--restart", "unless-stopped", "postgres"]
        );
    }

    #[test]
    fn test_parse_containers() {
        let output = "\
web,web-alias::0.0.0.0:8080->80/tcp::abc123
db::::def456
worker::0.0.0.0:9000->9000/tcp, 0.0.0.0:9001->9001/tcp::0a1b2c
";
        let containers = parse_containers(output);
        assert_eq!(containers.len(), 3);

        assert_eq!(containers[0].names, vec!["web", "web-alias"]);
        assert_eq!(containers[0].ports, vec![8080]);
        assert_eq!(containers[0].id, "abc123");

        assert!(containers[1].ports.is_empty());
        assert_eq!(containers[1].id, "def456");

        assert_eq!(containers[2].ports, vec![9000, 9001]);
    }
}
