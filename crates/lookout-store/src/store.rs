//! Job record storage: trait plus file-backed implementation.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use lookout_core::{JobEvent, JobId, JobRecord, ScanError, ScanJob, TransitionError};

/// Errors that can occur during job store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job already exists: {0}")]
    Duplicate(JobId),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Job store lock poisoned")]
    Poisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for ScanError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => ScanError::NotFound(id.to_string()),
            StoreError::Transition(t) => ScanError::Conflict { state: t.from },
            other => ScanError::Store(other.to_string()),
        }
    }
}

/// Persistence backend for scan job records.
///
/// Implementations must make each method atomic with respect to the others:
/// `apply` and `request_cancel` are conditional writes that either succeed
/// against the current state or leave the record untouched.
pub trait JobStore: Send + Sync {
    /// Persist a newly created job. Fails if the id is already taken.
    fn insert(&self, job: &ScanJob) -> Result<(), StoreError>;

    /// Fetch a full record (job and result entries).
    fn get(&self, id: JobId) -> Result<JobRecord, StoreError>;

    /// Fetch the job alone.
    fn job(&self, id: JobId) -> Result<ScanJob, StoreError>;

    /// All jobs ordered by `started_at` descending.
    fn list(&self) -> Result<Vec<ScanJob>, StoreError>;

    /// Apply a state machine event and persist the outcome.
    fn apply(&self, id: JobId, event: JobEvent) -> Result<ScanJob, StoreError>;

    /// Record a cancellation request on a non-terminal job.
    fn request_cancel(&self, id: JobId) -> Result<ScanJob, StoreError>;

    /// Fail every Pending or Running job as interrupted. Returns the swept ids.
    fn sweep_interrupted(&self) -> Result<Vec<JobId>, StoreError>;
}

/// File-system backed job store.
///
/// Records live in a flat directory:
/// ```text
/// {root}/
///   jobs/
///     {job_id}.json
/// ```
///
/// All records are loaded into memory on open; reads are served from memory
/// and every write goes to disk before the in-memory copy is replaced.
pub struct FileJobStore {
    jobs_dir: PathBuf,
    records: Mutex<HashMap<JobId, JobRecord>>,
}

impl FileJobStore {
    /// Open (or create) a store rooted at the given directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let jobs_dir = root.into().join("jobs");
        fs::create_dir_all(&jobs_dir)?;

        let records = load_records(&jobs_dir)?;
        tracing::info!(
            path = %jobs_dir.display(),
            jobs = records.len(),
            "Job store opened"
        );

        Ok(Self {
            jobs_dir,
            records: Mutex::new(records),
        })
    }

    fn record_path(&self, id: JobId) -> PathBuf {
        self.jobs_dir.join(format!("{}.json", id.0))
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<JobId, JobRecord>>, StoreError> {
        self.records.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Write a record via temp file + rename.
    fn persist(&self, record: &JobRecord) -> Result<(), StoreError> {
        let path = self.record_path(record.job.id);
        let tmp = path.with_extension("json.tmp");

        let json = serde_json::to_vec_pretty(record)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;

        tracing::debug!(
            job_id = %record.job.id,
            state = %record.job.state,
            progress = record.job.progress,
            "Job record persisted"
        );
        Ok(())
    }

    /// Read-modify-write of one record under the lock.
    ///
    /// The mutation runs on a copy; memory is only updated once the copy is
    /// on disk, so a failed write leaves both views unchanged.
    fn update<F>(&self, id: JobId, mutate: F) -> Result<ScanJob, StoreError>
    where
        F: FnOnce(&mut JobRecord) -> Result<(), StoreError>,
    {
        let mut records = self.lock()?;
        let current = records.get(&id).ok_or(StoreError::NotFound(id))?;

        let mut next = current.clone();
        mutate(&mut next)?;
        self.persist(&next)?;

        let job = next.job.clone();
        records.insert(id, next);
        Ok(job)
    }
}

impl JobStore for FileJobStore {
    fn insert(&self, job: &ScanJob) -> Result<(), StoreError> {
        let mut records = self.lock()?;
        if records.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id));
        }

        let record = JobRecord::new(job.clone());
        self.persist(&record)?;
        records.insert(job.id, record);
        Ok(())
    }

    fn get(&self, id: JobId) -> Result<JobRecord, StoreError> {
        self.lock()?
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    fn job(&self, id: JobId) -> Result<ScanJob, StoreError> {
        self.lock()?
            .get(&id)
            .map(|r| r.job.clone())
            .ok_or(StoreError::NotFound(id))
    }

    fn list(&self) -> Result<Vec<ScanJob>, StoreError> {
        let mut jobs: Vec<ScanJob> = self.lock()?.values().map(|r| r.job.clone()).collect();
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(jobs)
    }

    fn apply(&self, id: JobId, event: JobEvent) -> Result<ScanJob, StoreError> {
        self.update(id, |record| Ok(record.apply(event, Utc::now())?))
    }

    fn request_cancel(&self, id: JobId) -> Result<ScanJob, StoreError> {
        self.update(id, |record| Ok(record.request_cancel()?))
    }

    fn sweep_interrupted(&self) -> Result<Vec<JobId>, StoreError> {
        let stale: Vec<JobId> = self
            .lock()?
            .values()
            .filter(|r| !r.job.state.is_terminal())
            .map(|r| r.job.id)
            .collect();

        let mut swept = Vec::with_capacity(stale.len());
        for id in stale {
            match self.apply(id, JobEvent::Interrupted) {
                Ok(_) => swept.push(id),
                // Reached a terminal state between the scan and the write.
                Err(StoreError::Transition(_)) => {}
                Err(e) => return Err(e),
            }
        }

        if !swept.is_empty() {
            tracing::warn!(count = swept.len(), "Swept interrupted scan jobs");
        }
        Ok(swept)
    }
}

/// Load every record in the directory, skipping unreadable ones.
fn load_records(dir: &Path) -> Result<HashMap<JobId, JobRecord>, StoreError> {
    let mut records = HashMap::new();

    for entry in fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        let ext = path.extension().and_then(|e| e.to_str());

        if ext == Some("tmp") {
            // Torn write from a crash; the previous record (if any) is intact.
            let _ = fs::remove_file(&path);
            continue;
        }
        if ext != Some("json") {
            continue;
        }

        let parsed = fs::read(&path)
            .map_err(StoreError::from)
            .and_then(|bytes| Ok(serde_json::from_slice::<JobRecord>(&bytes)?));

        match parsed {
            Ok(record) => {
                records.insert(record.job.id, record);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable job record");
            }
        }
    }

    Ok(records)
}
