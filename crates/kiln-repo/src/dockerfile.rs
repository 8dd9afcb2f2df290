//! Dockerfile derivation for image builds.
//!
//! Repositories either carry their own `Dockerfile` or rely on a language
//! template fetched over http. Either way the server may need to inject
//! build-time variables (proxies and the like) that repository authors
//! should not have to declare. Injected values enter as `ENV` lines right
//! after the first `FROM` and are unset again just before `ENTRYPOINT` so
//! they do not leak into the final image.

use kiln_core::error::{Error, Result};
use kiln_core::manifest::RuntimeFamily;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

const PYTHON_TEMPLATE_URL: &str =
    "https://raw.githubusercontent.com/kilnhq/kiln/master/dockerfiles/python.Dockerfile";
const R_TEMPLATE_URL: &str =
    "https://raw.githubusercontent.com/kilnhq/kiln/master/dockerfiles/r.Dockerfile";

/// Marker line in template Dockerfiles replaced by the dependency-install
/// stanza when the repository declares requirements.
const TEMPLATE_MARKER: &str = "# TEMPLATE LINE OVERWRITE";

const DERIVED_FILE_NAME: &str = "build.Dockerfile";

#[derive(Debug, Clone)]
pub struct DerivedDockerfile {
    /// File to hand to the image build, relative to the clone root.
    pub path: PathBuf,
    /// Whether a derived `build.Dockerfile` was written.
    pub changed: bool,
}

/// Produces the Dockerfile to build from for the given family, writing a
/// derived `build.Dockerfile` at the clone root when any transformation
/// applied.
pub async fn derive_dockerfile(
    family: RuntimeFamily,
    repo_dir: &Path,
    build_args: &HashMap<String, String>,
) -> Result<DerivedDockerfile> {
    let (mut content, mut changed) = match family {
        RuntimeFamily::Dockerfile => {
            let path = repo_dir.join("Dockerfile");
            if !path.exists() {
                return Err(Error::Manifest("Dockerfile missing".to_string()));
            }
            let content = std::fs::read_to_string(&path)?;
            (content.trim().to_string(), false)
        }
        RuntimeFamily::Python | RuntimeFamily::R => {
            let template = fetch_template(family).await?;
            (apply_requirements(&template, family, repo_dir), true)
        }
    };

    if !build_args.is_empty() {
        content = inject_build_args(&content, build_args);
        changed = true;
    }

    if changed {
        let path = repo_dir.join(DERIVED_FILE_NAME);
        std::fs::write(&path, content)?;
        info!(path = %path.display(), "wrote derived dockerfile");
        Ok(DerivedDockerfile { path, changed })
    } else {
        Ok(DerivedDockerfile {
            path: repo_dir.join("Dockerfile"),
            changed,
        })
    }
}

async fn fetch_template(family: RuntimeFamily) -> Result<String> {
    let url = match family {
        RuntimeFamily::Python => PYTHON_TEMPLATE_URL,
        RuntimeFamily::R => R_TEMPLATE_URL,
        RuntimeFamily::Dockerfile => unreachable!("dockerfile family has no template"),
    };

    let response = reqwest::get(url)
        .await
        .map_err(|e| Error::Manifest(format!("could not fetch template dockerfile: {e}")))?;
    response
        .text()
        .await
        .map_err(|e| Error::Manifest(format!("could not read template dockerfile: {e}")))
}

/// Replaces the template marker with the dependency-install stanza when the
/// repository carries a requirements file.
fn apply_requirements(template: &str, family: RuntimeFamily, repo_dir: &Path) -> String {
    if !repo_dir.join("requirements.txt").exists() {
        return template.to_string();
    }

    let stanza = match family {
        RuntimeFamily::Python => {
            "COPY requirements.txt requirements.txt\nRUN pip install -r requirements.txt"
        }
        RuntimeFamily::R => {
            "COPY requirements.txt requirements.txt\nRUN Rscript -e 'install.packages(readLines(\"requirements.txt\"))'"
        }
        RuntimeFamily::Dockerfile => return template.to_string(),
    };

    template.replacen(TEMPLATE_MARKER, stanza, 1)
}

/// Splices build args into a Dockerfile as environment variables: set after
/// the first `FROM`, unset immediately before `ENTRYPOINT` (or at the end
/// when there is none).
fn inject_build_args(content: &str, build_args: &HashMap<String, String>) -> String {
    if build_args.is_empty() {
        return content.to_string();
    }

    let mut keys: Vec<_> = build_args.keys().collect();
    keys.sort();

    let set_line = {
        let pairs: Vec<String> = keys
            .iter()
            .map(|k| format!("{k}={}", build_args[k.as_str()]))
            .collect();
        format!("ENV {}", pairs.join(" "))
    };
    let unset_line = {
        let pairs: Vec<String> = keys.iter().map(|k| format!("{k}=")).collect();
        format!("ENV {}", pairs.join(" "))
    };

    let lines: Vec<&str> = content.lines().collect();
    let from_index = lines
        .iter()
        .position(|line| line.trim().to_uppercase().starts_with("FROM"));
    let entrypoint_index = lines
        .iter()
        .position(|line| line.trim().to_uppercase().starts_with("ENTRYPOINT"));

    let mut out: Vec<String> = Vec::with_capacity(lines.len() + 4);
    for (i, line) in lines.iter().enumerate() {
        if Some(i) == entrypoint_index {
            out.push(unset_line.clone());
        }
        out.push(line.to_string());
        if Some(i) == from_index {
            out.push(set_line.clone());
        }
    }
    if entrypoint_index.is_none() {
        out.push(unset_line);
    }

    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCKERFILE: &str = "\
FROM python:3.11-slim
WORKDIR /repo
COPY . .
ENTRYPOINT [\"python\", \"main.py\"]";

    #[test]
    fn test_inject_build_args_wraps_body() {
        let args = HashMap::from([
            ("http_proxy".to_string(), "http://proxy:3128".to_string()),
            ("https_proxy".to_string(), "http://proxy:3128".to_string()),
        ]);

        let derived = inject_build_args(DOCKERFILE, &args);
        let lines: Vec<&str> = derived.lines().collect();

        assert_eq!(lines[0], "FROM python:3.11-slim");
        assert_eq!(
            lines[1],
            "ENV http_proxy=http://proxy:3128 https_proxy=http://proxy:3128"
        );
        assert_eq!(lines[4], "ENV http_proxy= https_proxy=");
        assert_eq!(lines[5], "ENTRYPOINT [\"python\", \"main.py\"]");
    }

    #[test]
    fn test_inject_build_args_without_entrypoint() {
        let args = HashMap::from([("key".to_string(), "value".to_string())]);
        let derived = inject_build_args("FROM alpine\nRUN true", &args);
        let lines: Vec<&str> = derived.lines().collect();
        assert_eq!(lines, vec!["FROM alpine", "ENV key=value", "RUN true", "ENV key="]);
    }

    #[test]
    fn test_inject_no_args_is_identity() {
        assert_eq!(inject_build_args(DOCKERFILE, &HashMap::new()), DOCKERFILE);
    }

    #[test]
    fn test_apply_requirements_substitutes_marker() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("requirements.txt"), "pandas\n").unwrap();

        let template = "FROM python:3.11\n# TEMPLATE LINE OVERWRITE\nENTRYPOINT [\"python\"]";
        let derived = apply_requirements(template, RuntimeFamily::Python, tmp.path());

        assert!(derived.contains("COPY requirements.txt requirements.txt"));
        assert!(derived.contains("RUN pip install -r requirements.txt"));
        assert!(!derived.contains(TEMPLATE_MARKER));
    }

    #[test]
    fn test_apply_requirements_without_file_is_identity() {
        let tmp = tempfile::tempdir().unwrap();
        let template = "FROM python:3.11\n# TEMPLATE LINE OVERWRITE";
        assert_eq!(
            apply_requirements(template, RuntimeFamily::Python, tmp.path()),
            template
        );
    }

    #[tokio::test]
    async fn test_derive_requires_dockerfile() {
        let tmp = tempfile::tempdir().unwrap();
        let err = derive_dockerfile(RuntimeFamily::Dockerfile, tmp.path(), &HashMap::new()).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_derive_plain_dockerfile_is_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("Dockerfile"), DOCKERFILE).unwrap();

        let derived = derive_dockerfile(RuntimeFamily::Dockerfile, tmp.path(), &HashMap::new())
            .await
            .unwrap();
        assert!(!derived.changed);
        assert!(derived.path.ends_with("Dockerfile"));
        assert!(!tmp.path().join("build.Dockerfile").exists());
    }

    #[tokio::test]
    async fn test_derive_writes_build_dockerfile_for_args() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("Dockerfile"), DOCKERFILE).unwrap();

        let args = HashMap::from([("key".to_string(), "value".to_string())]);
        let derived = derive_dockerfile(RuntimeFamily::Dockerfile, tmp.path(), &args)
            .await
            .unwrap();
        assert!(derived.changed);
        assert!(derived.path.ends_with("build.Dockerfile"));

        let written = std::fs::read_to_string(&derived.path).unwrap();
        assert!(written.contains("ENV key=value"));
    }
}
