//! The scan engine: launcher, query API, and cancellation.
//!
//! `ScanEngine` is the only entry point the HTTP and CLI surfaces use. Every
//! operation returns a [`ScanError`] on failure; none of them waits for a
//! scan to make progress.

use std::path::Path;
use std::sync::Arc;

use lookout_core::{
    JobEvent, JobId, JobState, JobStatus, ScanError, ScanJob, ScanMode, ScanResultEntry, TargetSpec,
};
use lookout_store::JobStore;

use crate::cancel::CancelRegistry;
use crate::config::ScanConfig;
use crate::error::EngineError;
use crate::pool::WorkerPool;
use crate::worker::WorkerContext;

pub struct ScanEngine {
    store: Arc<dyn JobStore>,
    config: Arc<ScanConfig>,
    pool: WorkerPool,
    cancellations: CancelRegistry,
}

impl ScanEngine {
    /// Recover from any previous run, then start the worker pool.
    ///
    /// Jobs left Pending or Running by a previous process are failed as
    /// interrupted and stale working directories are removed before the
    /// engine accepts work. Must be called inside a tokio runtime.
    pub fn new(config: ScanConfig, store: Arc<dyn JobStore>) -> Result<Self, EngineError> {
        let swept = store.sweep_interrupted()?;
        for id in &swept {
            tracing::warn!(job_id = %id, "Scan job interrupted by restart");
        }

        std::fs::create_dir_all(&config.work_dir)?;
        if !config.keep_work_dirs {
            remove_stale_work_dirs(&config.work_dir)?;
        }

        let config = Arc::new(config);
        let cancellations = CancelRegistry::new();
        let ctx = Arc::new(WorkerContext::new(
            store.clone(),
            config.clone(),
            cancellations.clone(),
        ));
        let pool = WorkerPool::start(ctx, config.max_concurrent_scans, config.queue_capacity);

        Ok(Self {
            store,
            config,
            pool,
            cancellations,
        })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Jobs that are queued or running: those holding a cancellation token.
    pub fn live_jobs(&self) -> usize {
        self.cancellations.len()
    }

    /// Validate `targets`, persist a Pending job, and hand it to the pool.
    ///
    /// Returns as soon as the job is queued. If the pool refuses the job it
    /// is failed immediately, but its id is still returned so the failure is
    /// visible through the query API.
    pub fn start_scan(&self, targets: &str, mode: ScanMode) -> Result<JobId, ScanError> {
        let spec = TargetSpec::parse(targets)?;
        let job = ScanJob::new(spec.canonical(), mode);
        let id = job.id;

        self.store.insert(&job)?;
        self.cancellations.register(id);

        if let Err(e) = self.pool.dispatch(id) {
            tracing::warn!(job_id = %id, error = %e, "Scan could not be dispatched");
            self.cancellations.remove(id);
            self.store.apply(
                id,
                JobEvent::DispatchFailed(format!("could not dispatch scan: {e}")),
            )?;
            return Ok(id);
        }

        tracing::info!(job_id = %id, mode = %mode, targets = %job.targets, "Scan queued");
        Ok(id)
    }

    pub fn get_status(&self, id: JobId) -> Result<JobStatus, ScanError> {
        Ok(self.store.job(id)?.status())
    }

    /// Result entries of a Completed job.
    pub fn get_results(&self, id: JobId) -> Result<Vec<ScanResultEntry>, ScanError> {
        let record = self.store.get(id)?;
        if record.job.state != JobState::Completed {
            return Err(ScanError::NotReady {
                state: record.job.state,
            });
        }
        Ok(record.results)
    }

    /// All jobs, newest first.
    pub fn get_history(&self) -> Result<Vec<ScanJob>, ScanError> {
        Ok(self.store.list()?)
    }

    pub fn get_job(&self, id: JobId) -> Result<ScanJob, ScanError> {
        Ok(self.store.job(id)?)
    }

    /// Request cancellation of a Pending or Running job.
    ///
    /// The request is recorded before the worker is signalled; the worker
    /// performs the transition to Cancelled.
    pub fn cancel_scan(&self, id: JobId) -> Result<ScanJob, ScanError> {
        let job = self.store.request_cancel(id)?;
        self.cancellations.cancel(id);
        tracing::info!(job_id = %id, state = %job.state, "Scan cancellation requested");
        Ok(job)
    }
}

/// Remove per-job directories left behind by a previous run.
fn remove_stale_work_dirs(work_dir: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(work_dir)?.flatten() {
        let path = entry.path();
        let is_job_dir = path.is_dir()
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.parse::<JobId>().is_ok());

        if is_job_dir {
            tracing::debug!(path = %path.display(), "Removing stale working directory");
            std::fs::remove_dir_all(&path)?;
        }
    }
    Ok(())
}
