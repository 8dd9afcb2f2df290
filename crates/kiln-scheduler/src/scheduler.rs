//! Scheduler facade: owns the root cancellation context and the manager's
//! lifetime.

use crate::manager::Manager;
use kiln_core::config::Config;
use kiln_core::error::{Error, Result};
use kiln_core::ids::{JobId, SourceId};
use kiln_core::job::Trigger;
use kiln_core::ports::Store;
use kiln_docker::ContainerRuntime;
use kiln_git::GitClient;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Scheduler {
    cancel: CancellationToken,
    manager: Arc<Manager>,
    handles: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Builds the scheduler after verifying both gateways are invokable.
    /// An unreachable container engine or missing git binary is fatal here;
    /// after startup the same failures are per-operation errors.
    pub async fn new(
        store: Arc<dyn Store>,
        git: Arc<dyn GitClient>,
        runtime: Arc<dyn ContainerRuntime>,
        config: Config,
    ) -> Result<Self> {
        git.system_check().await?;
        runtime.system_check().await?;

        let cancel = CancellationToken::new();
        let manager = Manager::new(store, git, runtime, config, cancel.child_token())?;

        Ok(Self {
            cancel,
            manager: Arc::new(manager),
            handles: tokio::sync::Mutex::new(Vec::new()),
        })
    }

    /// Spins up the manager loops. Idempotent: a second call is a no-op.
    pub async fn start(&self) {
        let handles = Arc::clone(&self.manager).start();
        self.handles.lock().await.extend(handles);
    }

    /// Cancels the root context, waits for the loops to return, and flushes
    /// any errors they left behind. The in-flight job, if any, is recorded
    /// as a failure by its worker.
    pub async fn close(&self) {
        info!("closing scheduler");
        self.cancel.cancel();

        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }

        for err in self.manager.errors() {
            warn!(error = %err, "error drained at shutdown");
        }
    }

    /// Enqueues a job for the source. Manual triggers go to the front of
    /// the queue.
    pub async fn add_job(&self, source_id: SourceId, trigger: Trigger) -> Result<()> {
        self.manager.add_job(source_id, trigger).await
    }

    /// Drains and returns every error the manager has surfaced so far.
    pub fn errors(&self) -> Vec<Error> {
        self.manager.errors()
    }

    /// Ids of jobs that ran to success, in completion order.
    pub fn completed_jobs(&self) -> Vec<JobId> {
        self.manager.completed_jobs()
    }

    pub fn queue_len(&self) -> usize {
        self.manager.queue_len()
    }
}
