//! Error types for the lookout-scan crate.

use lookout_core::FailureKind;
use lookout_store::StoreError;
use thiserror::Error;

/// Why a scan run did not produce a result set.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to start scanner {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Scanner exited with code {code}: {stderr}")]
    ProcessFailed { code: i32, stderr: String },

    #[error("Failed to parse scan results: {0}")]
    Parse(String),

    #[error("timed out")]
    TimedOut,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    /// The failure cause recorded on the job.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Spawn { .. } => FailureKind::Spawn,
            Self::ProcessFailed { .. } | Self::Io(_) => FailureKind::Process,
            Self::Parse(_) => FailureKind::Parse,
            Self::TimedOut => FailureKind::Timeout,
        }
    }
}

/// Errors raised while bringing the engine up.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
