//! The job manager: owns the queue, polls for due sources, and dispatches
//! one job at a time.

use crate::queue::JobQueue;
use crate::taskgroup::TaskGroup;
use kiln_core::config::Config;
use kiln_core::error::{Error, Result};
use kiln_core::ids::{JobId, SourceId};
use kiln_core::job::{Job, Trigger};
use kiln_core::ports::{SourceFilter, Store};
use kiln_core::source::{Source, SourceState, TASK_DATE_KEY};
use kiln_core::workspace::Workspace;
use kiln_docker::ContainerRuntime;
use kiln_git::GitClient;
use kiln_repo::Materializer;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// At most one job executes at any time; queued jobs wait their turn.
const MAX_ACTIVE_JOBS: usize = 1;

/// Holds a queue of jobs and dispatches them one at a time. Do not build a
/// `Manager` directly in application code; `Scheduler::new` creates one and
/// owns its lifetime.
pub struct Manager {
    store: Arc<dyn Store>,
    runtime: Arc<dyn ContainerRuntime>,
    materializer: Materializer,
    workspace: Workspace,
    queue: JobQueue,
    cancel: CancellationToken,
    errors_tx: mpsc::UnboundedSender<Error>,
    errors_rx: std::sync::Mutex<mpsc::UnboundedReceiver<Error>>,
    started: AtomicBool,
    completed_jobs: std::sync::Mutex<Vec<JobId>>,
    config: Config,
}

impl Manager {
    pub fn new(
        store: Arc<dyn Store>,
        git: Arc<dyn GitClient>,
        runtime: Arc<dyn ContainerRuntime>,
        config: Config,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let workspace = Workspace::new(&config.work_dir)?;
        let materializer =
            Materializer::new(git, Arc::clone(&runtime), workspace.clone(), &config)?;
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();

        Ok(Self {
            store,
            runtime,
            materializer,
            workspace,
            queue: JobQueue::new(),
            cancel,
            errors_tx,
            errors_rx: std::sync::Mutex::new(errors_rx),
            started: AtomicBool::new(false),
            completed_jobs: std::sync::Mutex::new(Vec::new()),
            config,
        })
    }

    /// Spawns the poll and dispatch loops. Calling this on an already
    /// started manager is a no-op that returns no handles.
    pub fn start(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Vec::new();
        }

        info!("starting job manager");
        vec![
            tokio::spawn(Arc::clone(&self).poll_loop()),
            tokio::spawn(Arc::clone(&self).dispatch_loop()),
        ]
    }

    /// Creates a job for the source, materializes its repository, and places
    /// the runnable task group on the queue. Manual triggers jump the queue
    /// but never preempt a running job.
    pub async fn add_job(&self, source_id: SourceId, trigger: Trigger) -> Result<()> {
        let mut source = self.store.get_source(source_id).await?;
        if source.state != SourceState::Noop {
            return Err(Error::Validation(format!(
                "source '{}' already has a job queued or running",
                source.unique_name
            )));
        }

        let job = self.store.add_job(source.id, trigger).await?;

        let prepared = self.materializer.materialize(&source, job.id).await?;
        let output_dir = self.workspace.output_dir(source.id, job.id)?;

        let mut group = TaskGroup::new(
            &prepared,
            source.id,
            job.id,
            source.task_date(),
            &output_dir,
            self.config.max_parallel_tasks,
            self.config.max_job_duration,
            self.cancel.child_token(),
            Arc::clone(&self.runtime),
        )?;

        // Secrets and the fire date outrank everything composed from the
        // manifest.
        let mut overrides = source.secret_map();
        overrides.insert(TASK_DATE_KEY.to_string(), source.task_date());
        group.add_env(&overrides);

        // Marking the source before it reaches the queue keeps the poll loop
        // from enqueueing it again on the next tick.
        source.to_queued();
        self.store.update_source(&source).await?;

        info!(source = %source.unique_name, job = %job.id, trigger = ?trigger, "job enqueued");

        match trigger {
            Trigger::Manual => self.queue.enqueue_top(group),
            Trigger::Schedule => self.queue.enqueue(group),
        }

        Ok(())
    }

    /// Drains and returns every error the loops have surfaced so far.
    pub fn errors(&self) -> Vec<Error> {
        let mut rx = self.errors_rx.lock().expect("errors receiver poisoned");
        let mut drained = Vec::new();
        while let Ok(err) = rx.try_recv() {
            drained.push(err);
        }
        drained
    }

    /// Ids of jobs that ran to success, in completion order.
    pub fn completed_jobs(&self) -> Vec<JobId> {
        self.completed_jobs.lock().expect("ledger poisoned").clone()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Asks the store for due sources and enqueues a job for each. Store
    /// failures are reported and the loop keeps ticking.
    async fn poll_loop(self: Arc<Self>) {
        let mut ticker = interval(self.config.poll_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let filter = SourceFilter { scheduled_to_run: true, mask_secrets: false };
                    let due = match self.store.get_sources(filter).await {
                        Ok(due) => due,
                        Err(err) => {
                            warn!(error = %err, "could not fetch sources in scheduler");
                            let _ = self.errors_tx.send(err);
                            continue;
                        }
                    };

                    for source in due {
                        if let Err(err) = self.add_job(source.id, Trigger::Schedule).await {
                            warn!(source = %source.unique_name, error = %err, "could not add new job");
                            let _ = self.errors_tx.send(err);
                        }
                    }
                }
                _ = self.cancel.cancelled() => return,
            }
        }
    }

    /// Moves work from the queue into the single active-worker slot. The
    /// capacity-1 done channel, not the task semaphore, is what holds the
    /// one-job-at-a-time invariant.
    async fn dispatch_loop(self: Arc<Self>) {
        let (done_tx, mut done_rx) = mpsc::channel::<()>(1);
        let mut ticker = interval(self.config.dispatch_interval);
        let mut active = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if active < MAX_ACTIVE_JOBS {
                        if let Some(group) = self.queue.dequeue() {
                            active += 1;
                            tokio::spawn(Arc::clone(&self).run_job(group, done_tx.clone()));
                        }
                    }
                }
                Some(()) = done_rx.recv() => active -= 1,
                _ = self.cancel.cancelled() => return,
            }
        }
    }

    /// One worker run. Always writes the job meta file and releases the
    /// slot, whatever happened before.
    async fn run_job(self: Arc<Self>, group: TaskGroup, done: mpsc::Sender<()>) {
        let source_id = group.source_id;
        let job_id = group.job_id;
        let name = group.name.clone();
        let task_date = group.task_date.clone();

        if let Err(err) = self.dispatch(group).await {
            error!(source = %source_id, job = %job_id, error = %err, "job failed");
            let _ = self.errors_tx.send(err);
        }

        if let Err(err) = self.workspace.write_meta(source_id, job_id, &name, &task_date) {
            warn!(job = %job_id, error = %err, "could not save job meta data");
        }

        let _ = done.send(()).await;
    }

    async fn dispatch(&self, group: TaskGroup) -> Result<()> {
        let mut log_file = self.workspace.log_file(group.source_id, group.job_id)?;

        let (mut source, mut job) = match self.retrieve_work(&group).await {
            Ok(pair) => pair,
            Err(err) => {
                let _ = log_file.append(&err.to_string());
                return Err(err);
            }
        };

        if let Err(err) = self.init_work(&mut source, &mut job).await {
            let _ = log_file.append(&err.to_string());
            return Err(err);
        }

        info!(source = %source.unique_name, job = %job.id, "job started");

        match group.execute().await {
            Ok(report) => {
                if let Err(err) = self.finish_work(&mut source, &mut job, true).await {
                    let _ = log_file.append(&err.to_string());
                    return Err(err);
                }
                log_file.append(&report.logs)?;
                self.completed_jobs
                    .lock()
                    .expect("ledger poisoned")
                    .push(job.id);
                info!(job = %job.id, steps = report.steps.len(), "job succeeded");
                Ok(())
            }
            Err(err) => {
                let _ = log_file.append(&err.to_string());
                // The terminal state must still land in the store; a failing
                // persist is reported alongside the execution error.
                if let Err(persist_err) = self.finish_work(&mut source, &mut job, false).await {
                    let _ = log_file.append(&persist_err.to_string());
                    let _ = self.errors_tx.send(persist_err);
                }
                Err(err)
            }
        }
    }

    async fn retrieve_work(&self, group: &TaskGroup) -> Result<(Source, Job)> {
        let source = self
            .store
            .get_source(group.source_id)
            .await
            .map_err(|e| Error::Store(format!("source could not be retrieved: {e}")))?;
        let job = self
            .store
            .get_job(group.job_id)
            .await
            .map_err(|e| Error::Store(format!("job could not be retrieved: {e}")))?;
        Ok((source, job))
    }

    async fn init_work(&self, source: &mut Source, job: &mut Job) -> Result<()> {
        source.to_running();
        job.to_running()?;
        self.persist(source, job).await
    }

    async fn finish_work(&self, source: &mut Source, job: &mut Job, success: bool) -> Result<()> {
        source.to_completed()?;
        if success {
            job.to_success()?;
        } else {
            job.to_failure()?;
        }
        self.persist(source, job).await
    }

    async fn persist(&self, source: &Source, job: &Job) -> Result<()> {
        self.store
            .update_job(job)
            .await
            .map_err(|e| Error::Store(format!("could not update job status: {e}")))?;
        self.store
            .update_source(source)
            .await
            .map_err(|e| Error::Store(format!("could not update source status: {e}")))?;
        Ok(())
    }
}
