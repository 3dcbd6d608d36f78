//! Bounded worker pool.
//!
//! Accepted jobs wait on a bounded queue. A dispatcher task pulls them off
//! one at a time and spawns a worker per job once a semaphore slot is free,
//! so at most `max_concurrent_scans` scanner processes run at once.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;

use lookout_core::{JobEvent, JobId};

use crate::worker::{self, WorkerContext};

/// Why a job could not be queued.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    #[error("scan queue is full")]
    QueueFull,

    #[error("worker pool is shut down")]
    Closed,
}

/// Handle for submitting jobs. Dropping every handle stops the dispatcher
/// once the queue drains.
pub struct WorkerPool {
    queue: mpsc::Sender<JobId>,
}

impl WorkerPool {
    /// Start the dispatcher. Must be called inside a tokio runtime.
    pub fn start(ctx: Arc<WorkerContext>, workers: usize, capacity: usize) -> Self {
        let workers = workers.max(1);
        let (queue, rx) = mpsc::channel(capacity.max(1));
        let slots = Arc::new(Semaphore::new(workers));

        tokio::spawn(dispatch_loop(ctx, rx, slots));
        tracing::info!(workers, capacity = capacity.max(1), "Worker pool started");

        Self { queue }
    }

    /// Queue a job without waiting for room.
    pub fn dispatch(&self, id: JobId) -> Result<(), DispatchError> {
        self.queue.try_send(id).map_err(|e| match e {
            TrySendError::Full(_) => DispatchError::QueueFull,
            TrySendError::Closed(_) => DispatchError::Closed,
        })
    }
}

async fn dispatch_loop(
    ctx: Arc<WorkerContext>,
    mut rx: mpsc::Receiver<JobId>,
    slots: Arc<Semaphore>,
) {
    while let Some(id) = rx.recv().await {
        let Ok(permit) = slots.clone().acquire_owned().await else {
            break;
        };

        let ctx = ctx.clone();
        tokio::spawn(async move {
            supervise(ctx, id).await;
            drop(permit);
        });
    }

    tracing::debug!("Worker pool dispatcher stopped");
}

/// Run one job, failing it as interrupted if its worker panics.
async fn supervise(ctx: Arc<WorkerContext>, id: JobId) {
    let worker = tokio::spawn({
        let ctx = ctx.clone();
        async move { worker::run_job(&ctx, id).await }
    });

    if let Err(e) = worker.await {
        tracing::error!(job_id = %id, error = %e, "Scan worker panicked");
        if let Err(e) = ctx.store.apply(id, JobEvent::Interrupted) {
            tracing::error!(job_id = %id, error = %e, "Failed to record interrupted scan");
        }
        ctx.cancellations.remove(id);
    }
}
