//! Core domain types for Lookout scan jobs.
//!
//! These types are shared by the job record store, the scan engine, and the
//! HTTP surface. Field names serialize in camelCase to match the wire format
//! polled by dashboard clients.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ScanError;

// ── Job identity ─────────────────────────────────────────────────

/// Opaque, immutable identifier of a scan job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = ScanError;

    /// Unparseable ids cannot name a stored job, so they surface as `NotFound`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(JobId)
            .map_err(|_| ScanError::NotFound(s.to_string()))
    }
}

// ── Enums ─────────────────────────────────────────────────────────

/// How deep the external scanner probes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    /// Lightweight discovery sweep (no ports).
    Quick,
    /// Deep probing of ports and services.
    Full,
}

impl ScanMode {
    /// The argument passed to the external scanner.
    pub fn as_arg(&self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Full => "full",
        }
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_arg())
    }
}

impl FromStr for ScanMode {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" => Ok(Self::Quick),
            "full" => Ok(Self::Full),
            other => Err(ScanError::Validation(format!(
                "invalid scan mode: {other:?} (expected quick or full)"
            ))),
        }
    }
}

/// Lifecycle state of a scan job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    /// Completed, Failed, and Cancelled admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

/// Machine-readable cause of a Failed job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The scanner could not be started.
    Spawn,
    /// The scanner exited non-zero.
    Process,
    /// The result document was missing or malformed.
    Parse,
    /// The scanner exceeded the mode's maximum duration.
    Timeout,
    /// The job could not be handed to a worker.
    Dispatch,
    /// The owning worker disappeared (restart or panic).
    Interrupted,
}

/// Reachability of a discovered device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    #[serde(other)]
    Unknown,
}

// ── Jobs ──────────────────────────────────────────────────────────

/// One requested scan and its tracked lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScanJob {
    pub id: JobId,
    pub targets: String,
    pub mode: ScanMode,
    pub state: JobState,
    pub progress: u8,
    pub status_message: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub devices_found: Option<u32>,
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub cancel_requested: bool,
    #[serde(default)]
    pub failure: Option<FailureKind>,
    #[serde(default)]
    pub result_digest: Option<String>,
}

impl ScanJob {
    /// A fresh Pending job for already-validated targets.
    pub fn new(targets: impl Into<String>, mode: ScanMode) -> Self {
        Self {
            id: JobId::new(),
            targets: targets.into(),
            mode,
            state: JobState::Pending,
            progress: 0,
            status_message: "Queued".to_string(),
            started_at: Utc::now(),
            completed_at: None,
            devices_found: None,
            duration_seconds: None,
            cancel_requested: false,
            failure: None,
            result_digest: None,
        }
    }

    /// The status projection polled by clients.
    pub fn status(&self) -> JobStatus {
        JobStatus {
            state: self.state,
            progress: self.progress,
            status_message: self.status_message.clone(),
        }
    }
}

/// Read-only projection returned by a status poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub state: JobState,
    pub progress: u8,
    pub status_message: String,
}

/// One discovered device, persisted with a Completed job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanResultEntry {
    pub ip_address: String,
    pub hostname: Option<String>,
    pub mac_address: Option<String>,
    pub device_type: String,
    pub status: DeviceStatus,
    #[serde(default)]
    pub open_ports: Vec<u16>,
    pub os_guess: Option<String>,
    pub vendor: Option<String>,
}
