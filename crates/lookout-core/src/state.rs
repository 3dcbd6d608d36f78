//! The scan job state machine.
//!
//! ```text
//! Pending ──Started──▶ Running ──Progress──▶ Running
//!    │                    ├──Completed──▶ Completed (or Cancelled if cancel was recorded first)
//!    │                    ├──Failed─────▶ Failed
//!    │                    └──Cancelled──▶ Cancelled
//!    ├──DispatchFailed──▶ Failed
//!    └──Interrupted─────▶ Failed   (also from Running)
//! ```
//!
//! Terminal states accept no events. Every mutation of a persisted job goes
//! through [`JobRecord::apply`], so the store can make each transition a
//! single conditional write.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TransitionError;
use crate::types::{FailureKind, JobState, ScanJob, ScanResultEntry};

/// Status message of jobs swept by crash recovery.
pub const INTERRUPTED_MESSAGE: &str = "interrupted";

/// Status message of jobs killed at the mode's deadline.
pub const TIMED_OUT_MESSAGE: &str = "timed out";

/// A job together with its result entries: the unit of persistence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub job: ScanJob,
    #[serde(default)]
    pub results: Vec<ScanResultEntry>,
}

/// Something that happened to a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// A worker picked the job up.
    Started,
    /// The scanner reported progress.
    Progress { percent: u8, message: String },
    /// The scanner exited 0 and its result document parsed.
    Completed {
        entries: Vec<ScanResultEntry>,
        duration: Duration,
        digest: String,
    },
    /// The scan failed for the given cause.
    Failed { kind: FailureKind, message: String },
    /// The worker honored a cancellation request.
    Cancelled,
    /// The job could not be handed to a worker.
    DispatchFailed(String),
    /// The owning worker is gone.
    Interrupted,
}

impl JobEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::Started => "start",
            Self::Progress { .. } => "progress",
            Self::Completed { .. } => "complete",
            Self::Failed { .. } => "fail",
            Self::Cancelled => "cancel",
            Self::DispatchFailed(_) => "dispatch failure",
            Self::Interrupted => "interrupt",
        }
    }
}

impl JobRecord {
    pub fn new(job: ScanJob) -> Self {
        Self {
            job,
            results: Vec::new(),
        }
    }

    /// Apply an event at time `now`, or reject it without mutating anything.
    pub fn apply(&mut self, event: JobEvent, now: DateTime<Utc>) -> Result<(), TransitionError> {
        let from = self.job.state;
        let illegal = |event: &JobEvent| TransitionError {
            from,
            event: event.name(),
        };

        match (from, event) {
            (JobState::Pending, JobEvent::Started) => {
                self.job.state = JobState::Running;
                self.job.progress = 0;
                self.job.status_message = format!("Starting {} scan", self.job.mode);
            }
            (JobState::Pending, JobEvent::DispatchFailed(message)) => {
                self.fail(FailureKind::Dispatch, message, now);
            }
            (JobState::Pending | JobState::Running, JobEvent::Interrupted) => {
                self.fail(FailureKind::Interrupted, INTERRUPTED_MESSAGE.to_string(), now);
            }
            (JobState::Running, JobEvent::Progress { percent, message }) => {
                self.job.progress = self.job.progress.max(percent.min(100));
                if !message.is_empty() {
                    self.job.status_message = message;
                }
            }
            (JobState::Running, JobEvent::Completed { .. }) if self.job.cancel_requested => {
                self.cancel(now);
            }
            (
                JobState::Running,
                JobEvent::Completed {
                    entries,
                    duration,
                    digest,
                },
            ) => {
                let count = entries.len() as u32;
                self.job.state = JobState::Completed;
                self.job.progress = 100;
                self.job.status_message = format!("Scan completed: {count} devices found");
                self.job.completed_at = Some(now);
                self.job.devices_found = Some(count);
                self.job.duration_seconds = Some(duration.as_secs_f64());
                self.job.result_digest = Some(digest);
                self.results = entries;
            }
            (JobState::Running, JobEvent::Failed { kind, message }) => {
                self.fail(kind, message, now);
            }
            (JobState::Running, JobEvent::Cancelled) => {
                self.cancel(now);
            }
            (_, event) => return Err(illegal(&event)),
        }

        Ok(())
    }

    /// Record that cancellation was requested.
    ///
    /// Only the flag is written; the owning worker performs the transition.
    pub fn request_cancel(&mut self) -> Result<(), TransitionError> {
        if self.job.state.is_terminal() {
            return Err(TransitionError {
                from: self.job.state,
                event: "cancel request",
            });
        }
        self.job.cancel_requested = true;
        Ok(())
    }

    fn fail(&mut self, kind: FailureKind, message: String, now: DateTime<Utc>) {
        self.job.state = JobState::Failed;
        self.job.failure = Some(kind);
        self.job.status_message = message;
        self.job.completed_at = Some(now);
        self.results.clear();
    }

    fn cancel(&mut self, now: DateTime<Utc>) {
        self.job.state = JobState::Cancelled;
        self.job.status_message = "Scan cancelled".to_string();
        self.job.completed_at = Some(now);
        self.results.clear();
    }
}
