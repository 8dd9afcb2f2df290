//! In-memory store double.

use async_trait::async_trait;
use chrono::Utc;
use kiln_core::error::{Error, Result};
use kiln_core::ids::{JobId, SourceId};
use kiln_core::job::{Job, Trigger};
use kiln_core::ports::{SourceFilter, Store};
use kiln_core::source::{Source, SourceState};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// Hash-map backed [`Store`] implementation. `set_failing(true)` makes every
/// operation return a store error, for exercising the manager's error
/// channel.
#[derive(Default)]
pub struct MemoryStore {
    sources: Mutex<HashMap<SourceId, Source>>,
    jobs: Mutex<HashMap<JobId, Job>>,
    next_job: AtomicI64,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_source(&self, source: Source) {
        self.sources.lock().unwrap().insert(source.id, source);
    }

    /// Snapshot accessor for assertions.
    pub fn source(&self, id: SourceId) -> Option<Source> {
        self.sources.lock().unwrap().get(&id).cloned()
    }

    /// Snapshot accessor for assertions.
    pub fn job(&self, id: JobId) -> Option<Job> {
        self.jobs.lock().unwrap().get(&id).cloned()
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().unwrap().values().cloned().collect()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Store("memory store set to fail".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_sources(&self, filter: SourceFilter) -> Result<Vec<Source>> {
        self.check()?;
        let now = Utc::now();
        let mut sources: Vec<Source> = self
            .sources
            .lock()
            .unwrap()
            .values()
            .filter(|s| {
                !filter.scheduled_to_run
                    || (s.state == SourceState::Noop && s.next_fire <= now)
            })
            .cloned()
            .collect();

        if filter.mask_secrets {
            for source in &mut sources {
                source.mask_secrets();
            }
        }

        sources.sort_by_key(|s| s.id);
        Ok(sources)
    }

    async fn get_source(&self, id: SourceId) -> Result<Source> {
        self.check()?;
        self.source(id)
            .ok_or_else(|| Error::Store(format!("could not find source with id '{id}'")))
    }

    async fn update_source(&self, source: &Source) -> Result<Source> {
        self.check()?;
        self.sources
            .lock()
            .unwrap()
            .insert(source.id, source.clone());
        Ok(source.clone())
    }

    async fn add_job(&self, source_id: SourceId, trigger: Trigger) -> Result<Job> {
        self.check()?;
        let id = JobId::new(self.next_job.fetch_add(1, Ordering::SeqCst) + 1);
        let job = Job::new(id, source_id, trigger);
        self.jobs.lock().unwrap().insert(id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: JobId) -> Result<Job> {
        self.check()?;
        self.job(id)
            .ok_or_else(|| Error::Store(format!("could not find job with id '{id}'")))
    }

    async fn update_job(&self, job: &Job) -> Result<Job> {
        self.check()?;
        self.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(job.clone())
    }
}
