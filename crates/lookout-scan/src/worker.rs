//! Execution of a single scan job.
//!
//! The worker owns its job from `Started` until the terminal event: it is the
//! only writer of progress and outcome for that job. Every failure ends up in
//! the job's status message.

use std::path::Path;
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use lookout_core::{FailureKind, JobEvent, JobId, ScanJob};
use lookout_store::{JobStore, StoreError};

use crate::cancel::CancelRegistry;
use crate::config::ScanConfig;
use crate::document;
use crate::error::{Result, WorkerError};
use crate::process::{ProcessOutcome, ScannerCommand, Supervision};

/// Everything a worker needs, shared by all workers of a pool.
pub struct WorkerContext {
    pub store: Arc<dyn JobStore>,
    pub config: Arc<ScanConfig>,
    pub scanner: ScannerCommand,
    pub cancellations: CancelRegistry,
}

impl WorkerContext {
    pub fn new(
        store: Arc<dyn JobStore>,
        config: Arc<ScanConfig>,
        cancellations: CancelRegistry,
    ) -> Self {
        let scanner = ScannerCommand::from_config(&config);
        Self {
            store,
            config,
            scanner,
            cancellations,
        }
    }
}

/// Run job `id` to a terminal state.
pub async fn run_job(ctx: &WorkerContext, id: JobId) {
    let token = ctx.cancellations.token(id);

    let job = match ctx.store.apply(id, JobEvent::Started) {
        Ok(job) => job,
        Err(e) => {
            tracing::error!(job_id = %id, error = %e, "Failed to start scan job");
            if !matches!(e, StoreError::Transition(_)) {
                record_fallback(ctx, id, JobEvent::Interrupted);
            }
            ctx.cancellations.remove(id);
            return;
        }
    };

    tracing::info!(
        job_id = %id,
        mode = %job.mode,
        targets = %job.targets,
        "Scan started"
    );

    if job.cancel_requested || token.is_cancelled() {
        record_outcome(ctx, id, JobEvent::Cancelled);
        ctx.cancellations.remove(id);
        return;
    }

    let dir = ctx.config.work_dir.join(id.to_string());
    let event = match execute(ctx, &job, &dir, &token).await {
        Ok(event) => event,
        // A run torn down by a cancel request ends as Cancelled, not Failed.
        Err(_) if token.is_cancelled() => JobEvent::Cancelled,
        Err(e) => {
            tracing::warn!(job_id = %id, error = %e, "Scan failed");
            JobEvent::Failed {
                kind: e.failure_kind(),
                message: e.to_string(),
            }
        }
    };

    record_outcome(ctx, id, event);

    if !ctx.config.keep_work_dirs {
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    job_id = %id,
                    path = %dir.display(),
                    error = %e,
                    "Failed to remove working directory"
                );
            }
        }
    }
    ctx.cancellations.remove(id);
}

/// Run the scanner and turn its outcome into the job's terminal event.
async fn execute(
    ctx: &WorkerContext,
    job: &ScanJob,
    dir: &Path,
    token: &CancellationToken,
) -> Result<JobEvent> {
    tokio::fs::create_dir_all(dir).await?;

    let supervision = Supervision::for_mode(&ctx.config, job.mode);
    let started = Instant::now();
    let id = job.id;

    let outcome = ctx
        .scanner
        .run(&job.targets, job.mode, dir, &supervision, token, |report| {
            let event = JobEvent::Progress {
                percent: report.percent().unwrap_or(0),
                message: report.message.unwrap_or_default(),
            };
            if let Err(e) = ctx.store.apply(id, event) {
                tracing::error!(job_id = %id, error = %e, "Failed to record scan progress");
            }
        })
        .await?;

    match outcome {
        ProcessOutcome::Exited { code: Some(0), .. } => {
            let doc = document::read_result_document(dir, job.mode).await?;
            tracing::info!(
                job_id = %id,
                devices = doc.entries.len(),
                duration_ms = started.elapsed().as_millis() as u64,
                digest = %doc.digest,
                "Scanner exited cleanly"
            );
            Ok(JobEvent::Completed {
                entries: doc.entries,
                duration: started.elapsed(),
                digest: doc.digest,
            })
        }
        ProcessOutcome::Exited { code, stderr } => {
            tracing::warn!(job_id = %id, exit_code = ?code, "Scanner exited with failure");
            Err(WorkerError::ProcessFailed {
                code: code.unwrap_or(-1),
                stderr,
            })
        }
        ProcessOutcome::Cancelled => Ok(JobEvent::Cancelled),
        ProcessOutcome::TimedOut => Err(WorkerError::TimedOut),
    }
}

/// Write the terminal event. If the store refuses it for any reason other
/// than the job already being terminal, a minimal Failed record is written
/// instead so the job never stays Running without a worker.
fn record_outcome(ctx: &WorkerContext, id: JobId, event: JobEvent) {
    match ctx.store.apply(id, event) {
        Ok(job) => tracing::info!(
            job_id = %id,
            state = %job.state,
            devices_found = ?job.devices_found,
            status = %job.status_message,
            "Scan finished"
        ),
        Err(StoreError::Transition(e)) => {
            tracing::warn!(job_id = %id, error = %e, "Scan outcome rejected");
        }
        Err(e) => {
            tracing::error!(job_id = %id, error = %e, "Failed to record scan outcome");
            record_fallback(
                ctx,
                id,
                JobEvent::Failed {
                    kind: FailureKind::Process,
                    message: format!("could not record outcome: {e}"),
                },
            );
        }
    }
}

/// Last-resort terminal write, ending with `Interrupted` if even `event`
/// cannot be stored.
fn record_fallback(ctx: &WorkerContext, id: JobId, event: JobEvent) {
    let more = !matches!(event, JobEvent::Interrupted);
    match ctx.store.apply(id, event) {
        Ok(job) => tracing::warn!(
            job_id = %id,
            state = %job.state,
            status = %job.status_message,
            "Scan outcome recorded by fallback"
        ),
        Err(e) if more && !matches!(e, StoreError::Transition(_)) => {
            tracing::error!(job_id = %id, error = %e, "Fallback outcome write failed");
            record_fallback(ctx, id, JobEvent::Interrupted);
        }
        Err(e) => tracing::error!(job_id = %id, error = %e, "Scan left without a terminal state"),
    }
}
