//! Deterministic on-disk layout under the configured work root.
//!
//! ```text
//! <work-root>/
//!   repos/<unique-source-name>/          clone tree
//!   jobs/<source-id>/<job-id>/
//!     logs.txt                           run log, appended
//!     image.txt                          build/pull log, appended
//!     output/                            bind-mounted to /output
//!     meta.json
//! ```
//!
//! Directories are created on demand with mode 0777 and files with 0666 so
//! that task containers running under arbitrary uids can write their output.

use crate::error::Result;
use crate::ids::{JobId, SourceId};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

#[derive(Serialize)]
struct JobMeta<'a> {
    name: &'a str,
    date: &'a str,
}

fn create_dir(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o777);
    }
    builder.create(path)?;
    Ok(())
}

fn open_append(path: &Path) -> Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o666);
    }
    Ok(options.open(path)?)
}

fn open_truncate(path: &Path) -> Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o666);
    }
    Ok(options.open(path)?)
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        create_dir(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every clone tree; created on first use.
    pub fn ensure_repos_dir(&self) -> Result<PathBuf> {
        let dir = self.root.join("repos");
        create_dir(&dir)?;
        Ok(dir)
    }

    /// Clone path for a source. Not created here: a fresh clone expects the
    /// target to be absent.
    pub fn repo_dir(&self, unique_name: &str) -> PathBuf {
        self.root.join("repos").join(unique_name)
    }

    pub fn job_dir(&self, source_id: SourceId, job_id: JobId) -> Result<PathBuf> {
        let dir = self
            .root
            .join("jobs")
            .join(source_id.to_string())
            .join(job_id.to_string());
        create_dir(&dir)?;
        Ok(dir)
    }

    pub fn output_dir(&self, source_id: SourceId, job_id: JobId) -> Result<PathBuf> {
        let dir = self.job_dir(source_id, job_id)?.join("output");
        create_dir(&dir)?;
        Ok(dir)
    }

    /// Opens the per-job run log for appending.
    pub fn log_file(&self, source_id: SourceId, job_id: JobId) -> Result<LogFile> {
        let path = self.job_dir(source_id, job_id)?.join("logs.txt");
        Ok(LogFile { file: open_append(&path)? })
    }

    /// Opens the per-job image build/pull log for appending.
    pub fn image_log_file(&self, source_id: SourceId, job_id: JobId) -> Result<LogFile> {
        let path = self.job_dir(source_id, job_id)?.join("image.txt");
        Ok(LogFile { file: open_append(&path)? })
    }

    pub fn meta_path(&self, source_id: SourceId, job_id: JobId) -> Result<PathBuf> {
        Ok(self.job_dir(source_id, job_id)?.join("meta.json"))
    }

    pub fn write_meta(
        &self,
        source_id: SourceId,
        job_id: JobId,
        name: &str,
        date: &str,
    ) -> Result<()> {
        let path = self.meta_path(source_id, job_id)?;
        let data = serde_json::to_vec_pretty(&JobMeta { name, date })?;
        let mut file = open_truncate(&path)?;
        file.write_all(&data)?;
        Ok(())
    }
}

/// Append-only handle over a job log file.
#[derive(Debug)]
pub struct LogFile {
    file: File,
}

impl LogFile {
    pub fn append(&mut self, content: &str) -> Result<()> {
        writeln!(self.file, "{content}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::new(tmp.path().join("work")).unwrap();

        let sid = SourceId::new(3);
        let jid = JobId::new(17);

        assert_eq!(
            ws.repo_dir("weather-etl"),
            tmp.path().join("work").join("repos").join("weather-etl")
        );

        let output = ws.output_dir(sid, jid).unwrap();
        assert!(output.ends_with("jobs/3/17/output"));
        assert!(output.is_dir());
    }

    #[test]
    fn test_log_file_appends() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::new(tmp.path()).unwrap();
        let sid = SourceId::new(1);
        let jid = JobId::new(1);

        let mut log = ws.log_file(sid, jid).unwrap();
        log.append("first").unwrap();

        let mut log = ws.log_file(sid, jid).unwrap();
        log.append("second").unwrap();

        let content =
            fs::read_to_string(ws.job_dir(sid, jid).unwrap().join("logs.txt")).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }

    #[test]
    fn test_write_meta() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::new(tmp.path()).unwrap();
        let sid = SourceId::new(2);
        let jid = JobId::new(5);

        ws.write_meta(sid, jid, "weather-etl", "2020-01-01 00:00:00").unwrap();

        let content = fs::read_to_string(ws.meta_path(sid, jid).unwrap()).unwrap();
        assert!(content.contains("\"name\": \"weather-etl\""));
        assert!(content.contains("\"date\": \"2020-01-01 00:00:00\""));
    }
}
