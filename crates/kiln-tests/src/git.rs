//! Scripted git client double.
//!
//! "Cloning" writes the configured runtime manifest into the target
//! directory and records the head the clone was taken at, which is all the
//! materializer observes of a real clone.

use async_trait::async_trait;
use kiln_core::error::{Error, Result};
use kiln_git::GitClient;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct FakeGit {
    manifest_yaml: Mutex<String>,
    remote_head: Mutex<String>,
    local_heads: Mutex<HashMap<PathBuf, String>>,
    known_refs: Mutex<HashSet<String>>,
    clones: AtomicUsize,
    checkouts: Mutex<Vec<String>>,
}

impl FakeGit {
    pub fn new(manifest_yaml: impl Into<String>) -> Self {
        Self {
            manifest_yaml: Mutex::new(manifest_yaml.into()),
            remote_head: Mutex::new("a1b2c3d4".to_string()),
            local_heads: Mutex::new(HashMap::new()),
            known_refs: Mutex::new(HashSet::new()),
            clones: AtomicUsize::new(0),
            checkouts: Mutex::new(Vec::new()),
        }
    }

    /// Moves the remote head, making existing clones stale.
    pub fn set_remote_head(&self, head: impl Into<String>) {
        *self.remote_head.lock().unwrap() = head.into();
    }

    pub fn set_manifest(&self, manifest_yaml: impl Into<String>) {
        *self.manifest_yaml.lock().unwrap() = manifest_yaml.into();
    }

    /// Registers a reference `rev_parse_verify` should accept.
    pub fn add_ref(&self, reference: impl Into<String>) {
        self.known_refs.lock().unwrap().insert(reference.into());
    }

    pub fn clone_count(&self) -> usize {
        self.clones.load(Ordering::SeqCst)
    }

    pub fn checkouts(&self) -> Vec<String> {
        self.checkouts.lock().unwrap().clone()
    }

    pub fn head(&self) -> String {
        self.remote_head.lock().unwrap().clone()
    }
}

#[async_trait]
impl GitClient for FakeGit {
    async fn clone_repo(&self, _url: &str, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;

        let manifest = self.manifest_yaml.lock().unwrap().clone();
        if !manifest.is_empty() {
            std::fs::write(dir.join("runtime.yaml"), manifest)?;
            std::fs::write(dir.join("Dockerfile"), "FROM python:3.11-slim\nCOPY . .\n")?;
        }

        let head = self.head();
        self.local_heads
            .lock()
            .unwrap()
            .insert(dir.to_path_buf(), head);
        self.clones.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remote_head(&self, _dir: &Path, _branch: &str) -> Result<String> {
        Ok(self.head())
    }

    async fn rev_parse(&self, dir: &Path, _reference: &str) -> Result<String> {
        self.local_heads
            .lock()
            .unwrap()
            .get(dir)
            .cloned()
            .ok_or_else(|| Error::Git(format!("'{}' is not a clone", dir.display())))
    }

    async fn rev_parse_verify(&self, dir: &Path, reference: &str) -> Result<String> {
        if self.known_refs.lock().unwrap().contains(reference) {
            return Ok(reference.to_string());
        }
        let local = self.rev_parse(dir, reference).await?;
        if local == reference {
            return Ok(local);
        }
        Err(Error::Git(format!(
            "'{reference}' is not a valid commit or tag"
        )))
    }

    async fn checkout(&self, dir: &Path, reference: &str) -> Result<()> {
        if !dir.exists() {
            return Err(Error::Git(format!("'{}' is not a clone", dir.display())));
        }
        self.checkouts.lock().unwrap().push(reference.to_string());
        Ok(())
    }

    async fn system_check(&self) -> Result<()> {
        Ok(())
    }
}
