use thiserror::Error;

use crate::types::JobState;

/// Client-facing outcome of a failed engine operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScanError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Scan job not found: {0}")]
    NotFound(String),

    #[error("Scan results not ready: job is {state}")]
    NotReady { state: JobState },

    #[error("Scan job is already {state}")]
    Conflict { state: JobState },

    #[error("Job store error: {0}")]
    Store(String),
}

/// An event that the job state machine does not accept in the current state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Illegal transition: {event} while {from}")]
pub struct TransitionError {
    pub from: JobState,
    pub event: &'static str,
}
