//! lookout-core: Shared scan job types for the Lookout inventory console.
//!
//! This crate provides the foundational types used across all Lookout components:
//! - Job identity, scan modes, and discovered device entries
//! - The job state machine and its persisted record
//! - Syntactic validation of target specifications
//! - The client-facing error taxonomy

pub mod error;
pub mod state;
pub mod target;
pub mod types;

pub use error::{ScanError, TransitionError};
pub use state::{JobEvent, JobRecord};
pub use target::TargetSpec;
pub use types::{
    DeviceStatus, FailureKind, JobId, JobState, JobStatus, ScanJob, ScanMode, ScanResultEntry,
};
