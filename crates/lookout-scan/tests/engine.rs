//! End-to-end tests for the scan engine, with `/bin/sh` scripts standing in
//! for the external scanner. Each script sees `$1` targets, `$2` mode, and
//! `$3` its private output directory.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::time::{sleep, timeout, Instant};

use lookout_core::{
    DeviceStatus, FailureKind, JobEvent, JobId, JobRecord, JobState, ScanError, ScanJob, ScanMode,
};
use lookout_scan::{ScanConfig, ScanEngine};
use lookout_store::{FileJobStore, JobStore, StoreError};

const TWO_DEVICES: &str = r#"
echo '{"progress": 50, "message": "Scanning hosts"}' > "$3/status.json"
sleep 0.2
cat > "$3/results.json" <<'EOF'
[
  {"ipAddress": "192.168.1.20", "status": "online", "deviceType": "Workstation", "openPorts": [22]},
  {"ipAddress": "192.168.1.1", "status": "online", "vendor": "Cisco Systems"}
]
EOF
"#;

const HANGS: &str = r#"
echo '{"progress": 10, "message": "Probing"}' > "$3/status.json"
exec sleep 30
"#;

struct Harness {
    dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn script(&self, body: &str) -> PathBuf {
        let path = self.root().join("scanner.sh");
        std::fs::write(&path, body).unwrap();
        path
    }

    fn config(&self, body: &str) -> ScanConfig {
        let script = self.script(body);
        ScanConfig {
            scanner_program: "sh".to_string(),
            scanner_args: vec![script.display().to_string()],
            data_dir: self.root().join("data"),
            work_dir: self.root().join("scans"),
            poll_interval_ms: 50,
            cancel_grace_ms: 200,
            ..ScanConfig::default()
        }
    }

    fn store(&self) -> Arc<FileJobStore> {
        Arc::new(FileJobStore::open(self.root().join("data")).unwrap())
    }

    fn engine(&self, config: ScanConfig) -> ScanEngine {
        ScanEngine::new(config, self.store()).unwrap()
    }
}

async fn wait_terminal(engine: &ScanEngine, id: JobId) -> ScanJob {
    timeout(Duration::from_secs(20), async {
        loop {
            let job = engine.get_job(id).unwrap();
            if job.state.is_terminal() {
                return job;
            }
            sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("job did not reach a terminal state")
}

async fn wait_state(engine: &ScanEngine, id: JobId, state: JobState) {
    timeout(Duration::from_secs(10), async {
        while engine.get_status(id).unwrap().state != state {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job did not reach the expected state");
}

#[tokio::test]
async fn test_scan_completes_with_two_devices() {
    let h = Harness::new();
    let engine = h.engine(h.config(TWO_DEVICES));

    let id = engine.start_scan("192.168.1.0/24", ScanMode::Quick).unwrap();
    let job = wait_terminal(&engine, id).await;

    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.progress, 100);
    assert_eq!(job.status_message, "Scan completed: 2 devices found");
    assert_eq!(job.devices_found, Some(2));
    assert!(job.duration_seconds.is_some());
    assert!(job.completed_at.is_some());
    assert!(job.result_digest.is_some());

    let results = engine.get_results(id).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].ip_address, "192.168.1.1");
    assert_eq!(results[0].device_type, "Router");
    assert_eq!(results[1].device_type, "Workstation");
    assert_eq!(results[1].status, DeviceStatus::Online);
    assert!(results[1].open_ports.is_empty(), "quick scans carry no ports");

    assert!(!h.root().join("scans").join(id.to_string()).exists());
}

#[tokio::test]
async fn test_progress_is_monotonic() {
    let h = Harness::new();
    let script = r#"
for p in 20 60 40 80; do
  echo "{\"progress\": $p, \"message\": \"step $p\"}" > "$3/status.json"
  sleep 0.1
done
echo '[]' > "$3/results.json"
"#;
    let engine = h.engine(h.config(script));
    let id = engine.start_scan("10.0.0.1", ScanMode::Full).unwrap();

    let mut seen = Vec::new();
    timeout(Duration::from_secs(20), async {
        loop {
            let status = engine.get_status(id).unwrap();
            seen.push(status.progress);
            if status.state.is_terminal() {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {seen:?}");
    assert_eq!(seen.last(), Some(&100));
}

#[tokio::test]
async fn test_non_zero_exit_fails_with_stderr() {
    let h = Harness::new();
    let engine = h.engine(h.config("echo 'nmap: permission denied' >&2\nexit 1\n"));

    let id = engine.start_scan("10.0.0.1", ScanMode::Quick).unwrap();
    let job = wait_terminal(&engine, id).await;

    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.failure, Some(FailureKind::Process));
    assert!(job.status_message.contains("code 1"), "{}", job.status_message);
    assert!(job.status_message.contains("permission denied"));
    assert!(job.completed_at.is_some());
    assert_eq!(
        engine.get_results(id),
        Err(ScanError::NotReady {
            state: JobState::Failed
        })
    );
}

#[tokio::test]
async fn test_missing_program_fails_with_spawn() {
    let h = Harness::new();
    let mut config = h.config("exit 0\n");
    config.scanner_program = "/nonexistent/lookout-scanner".to_string();
    let engine = h.engine(config);

    let id = engine.start_scan("10.0.0.1", ScanMode::Quick).unwrap();
    let job = wait_terminal(&engine, id).await;

    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.failure, Some(FailureKind::Spawn));
}

#[tokio::test]
async fn test_cancel_while_running() {
    let h = Harness::new();
    let engine = h.engine(h.config(HANGS));

    let id = engine.start_scan("10.0.0.0/24", ScanMode::Full).unwrap();
    wait_state(&engine, id, JobState::Running).await;

    let started = Instant::now();
    let accepted = engine.cancel_scan(id).unwrap();
    assert!(accepted.cancel_requested);

    let job = wait_terminal(&engine, id).await;
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(job.state, JobState::Cancelled);
    assert_eq!(job.status_message, "Scan cancelled");
    assert!(job.completed_at.is_some());
    assert_eq!(
        engine.get_results(id),
        Err(ScanError::NotReady {
            state: JobState::Cancelled
        })
    );

    assert_eq!(
        engine.cancel_scan(id).unwrap_err(),
        ScanError::Conflict {
            state: JobState::Cancelled
        }
    );
}

#[tokio::test]
async fn test_cancel_on_completed_job_conflicts() {
    let h = Harness::new();
    let engine = h.engine(h.config("echo '[]' > \"$3/results.json\"\n"));

    let id = engine.start_scan("10.0.0.1", ScanMode::Quick).unwrap();
    assert_eq!(wait_terminal(&engine, id).await.state, JobState::Completed);

    assert_eq!(
        engine.cancel_scan(id).unwrap_err(),
        ScanError::Conflict {
            state: JobState::Completed
        }
    );
    assert_eq!(engine.get_status(id).unwrap().state, JobState::Completed);
}

#[tokio::test]
async fn test_scan_times_out() {
    let h = Harness::new();
    let mut config = h.config("exec sleep 30\n");
    config.quick_timeout_secs = 1;
    let engine = h.engine(config);

    let started = Instant::now();
    let id = engine.start_scan("10.0.0.1", ScanMode::Quick).unwrap();
    let job = wait_terminal(&engine, id).await;

    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.failure, Some(FailureKind::Timeout));
    assert_eq!(job.status_message, "timed out");
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_empty_results_complete() {
    let h = Harness::new();
    let engine = h.engine(h.config("echo '[]' > \"$3/results.json\"\n"));

    let id = engine.start_scan("10.0.0.0/30", ScanMode::Full).unwrap();
    let job = wait_terminal(&engine, id).await;

    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.devices_found, Some(0));
    assert_eq!(engine.get_results(id), Ok(vec![]));
}

#[tokio::test]
async fn test_missing_or_malformed_output_fails_parse() {
    for script in ["exit 0\n", "echo 'not json' > \"$3/results.json\"\n"] {
        let h = Harness::new();
        let engine = h.engine(h.config(script));

        let id = engine.start_scan("10.0.0.1", ScanMode::Quick).unwrap();
        let job = wait_terminal(&engine, id).await;

        assert_eq!(job.state, JobState::Failed, "script: {script}");
        assert_eq!(job.failure, Some(FailureKind::Parse));
        assert!(engine.get_results(id).is_err());
    }
}

#[tokio::test]
async fn test_nmap_xml_document_is_accepted() {
    let h = Harness::new();
    let script = r#"
cat > "$3/results.xml" <<'EOF'
<nmaprun>
  <host>
    <status state="up"/>
    <address addr="10.0.0.9" addrtype="ipv4"/>
    <ports><port protocol="tcp" portid="9100"><state state="open"/></port></ports>
  </host>
</nmaprun>
EOF
"#;
    let engine = h.engine(h.config(script));

    let id = engine.start_scan("10.0.0.9", ScanMode::Full).unwrap();
    assert_eq!(wait_terminal(&engine, id).await.state, JobState::Completed);

    let results = engine.get_results(id).unwrap();
    assert_eq!(results[0].ip_address, "10.0.0.9");
    assert_eq!(results[0].open_ports, vec![9100]);
    assert_eq!(results[0].device_type, "Printer");
}

#[tokio::test]
async fn test_scanner_receives_targets_and_mode() {
    let h = Harness::new();
    let script = r#"
printf '[{"ipAddress": "10.0.0.1", "hostname": "%s", "osGuess": "%s"}]' "$1" "$2" > "$3/results.json"
"#;
    let engine = h.engine(h.config(script));

    let id = engine
        .start_scan(" 10.0.0.1 , gateway.LAN ", ScanMode::Full)
        .unwrap();
    assert_eq!(wait_terminal(&engine, id).await.state, JobState::Completed);

    let entry = &engine.get_results(id).unwrap()[0];
    assert_eq!(entry.hostname.as_deref(), Some("10.0.0.1,gateway.lan"));
    assert_eq!(entry.os_guess.as_deref(), Some("full"));
}

#[tokio::test]
async fn test_recovery_after_restart() {
    let h = Harness::new();
    let stale_dir = h.root().join("scans").join(JobId::new().to_string());
    std::fs::create_dir_all(&stale_dir).unwrap();

    let (pending, running) = {
        let store = h.store();
        let pending = ScanJob::new("10.0.0.1", ScanMode::Quick);
        let running = ScanJob::new("10.0.0.2", ScanMode::Full);
        store.insert(&pending).unwrap();
        store.insert(&running).unwrap();
        store.apply(running.id, JobEvent::Started).unwrap();
        (pending.id, running.id)
    };

    let engine = h.engine(h.config("exit 0\n"));

    for id in [pending, running] {
        let job = engine.get_job(id).unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.failure, Some(FailureKind::Interrupted));
        assert_eq!(job.status_message, "interrupted");
    }
    assert!(!stale_dir.exists());
}

#[tokio::test]
async fn test_start_does_not_block_for_either_mode() {
    let h = Harness::new();
    let engine = h.engine(h.config(HANGS));

    let mut ids = Vec::new();
    for mode in [ScanMode::Quick, ScanMode::Full] {
        let started = Instant::now();
        let id = engine.start_scan("10.0.0.0/24", mode).unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));

        let status = engine.get_status(id).unwrap();
        assert!(matches!(status.state, JobState::Pending | JobState::Running));
        ids.push(id);
    }

    for id in ids {
        wait_state(&engine, id, JobState::Running).await;
        engine.cancel_scan(id).unwrap();
        assert_eq!(wait_terminal(&engine, id).await.state, JobState::Cancelled);
    }
}

#[tokio::test]
async fn test_full_queue_fails_dispatch() {
    let h = Harness::new();
    let mut config = h.config(HANGS);
    config.max_concurrent_scans = 1;
    config.queue_capacity = 1;
    let engine = h.engine(config);

    // Occupies the only slot.
    let first = engine.start_scan("10.0.0.1", ScanMode::Quick).unwrap();
    wait_state(&engine, first, JobState::Running).await;
    // Held by the dispatcher while it waits for the slot.
    let second = engine.start_scan("10.0.0.2", ScanMode::Quick).unwrap();
    sleep(Duration::from_millis(200)).await;
    // Fills the queue.
    let third = engine.start_scan("10.0.0.3", ScanMode::Quick).unwrap();

    let refused = engine.start_scan("10.0.0.4", ScanMode::Quick).unwrap();
    let job = engine.get_job(refused).unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.failure, Some(FailureKind::Dispatch));
    assert!(job.status_message.starts_with("could not dispatch scan"));

    // Queued jobs are cancelled without ever spawning a scanner.
    for id in [second, third, first] {
        engine.cancel_scan(id).unwrap();
    }
    for id in [first, second, third] {
        assert_eq!(wait_terminal(&engine, id).await.state, JobState::Cancelled);
    }
}

#[tokio::test]
async fn test_invalid_targets_create_no_job() {
    let h = Harness::new();
    let engine = h.engine(h.config("exit 0\n"));

    for targets in ["", "  ", "10.0.0.1,,10.0.0.2", "not a host!", "10.0.0.0/33"] {
        assert!(
            matches!(
                engine.start_scan(targets, ScanMode::Quick),
                Err(ScanError::Validation(_))
            ),
            "accepted {targets:?}"
        );
    }
    assert!(engine.get_history().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let h = Harness::new();
    let engine = h.engine(h.config("exit 0\n"));
    let id = JobId::new();

    assert!(matches!(engine.get_status(id), Err(ScanError::NotFound(_))));
    assert!(matches!(engine.get_results(id), Err(ScanError::NotFound(_))));
    assert!(matches!(engine.cancel_scan(id), Err(ScanError::NotFound(_))));
}

#[tokio::test]
async fn test_history_is_newest_first() {
    let h = Harness::new();
    let engine = h.engine(h.config("echo '[]' > \"$3/results.json\"\n"));

    let older = engine.start_scan("10.0.0.1", ScanMode::Quick).unwrap();
    sleep(Duration::from_millis(20)).await;
    let newer = engine.start_scan("10.0.0.2", ScanMode::Full).unwrap();
    wait_terminal(&engine, older).await;
    wait_terminal(&engine, newer).await;

    let ids: Vec<JobId> = engine.get_history().unwrap().iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![newer, older]);
}

#[tokio::test]
async fn test_work_dirs_kept_on_request() {
    let h = Harness::new();
    let mut config = h.config("echo '[]' > \"$3/results.json\"\n");
    config.keep_work_dirs = true;
    let engine = h.engine(config);

    let id = engine.start_scan("10.0.0.1", ScanMode::Quick).unwrap();
    wait_terminal(&engine, id).await;

    let dir = h.root().join("scans").join(id.to_string());
    assert!(dir.join("results.json").exists());
}

/// Scanner that backgrounds a long sleep, records its pid, and waits on it.
fn background_sleeper(pid_file: &Path) -> String {
    format!(
        "echo '{{\"progress\": 5, \"message\": \"Scanning\"}}' > \"$3/status.json\"\n\
         sleep 30 &\n\
         echo $! > '{}'\n\
         wait\n",
        pid_file.display()
    )
}

async fn read_pid(path: &Path) -> i32 {
    timeout(Duration::from_secs(10), async {
        loop {
            if let Ok(text) = std::fs::read_to_string(path) {
                if let Ok(pid) = text.trim().parse() {
                    return pid;
                }
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("scanner never recorded its child pid")
}

/// A killed orphan may linger as a zombie until reaped; that counts as gone.
fn is_running(pid: i32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        let state = stat.rsplit(')').next().unwrap_or("").trim_start();
        return !state.starts_with('Z');
    }
    kill(Pid::from_raw(pid), None).is_ok()
}

async fn assert_gone(pid: i32) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while is_running(pid) && Instant::now() < deadline {
        sleep(Duration::from_millis(20)).await;
    }
    assert!(!is_running(pid), "scanner child {pid} outlived its job");
}

#[tokio::test]
async fn test_timeout_kills_scanner_children() {
    let h = Harness::new();
    let pid_file = h.root().join("child.pid");
    let mut config = h.config(&background_sleeper(&pid_file));
    config.quick_timeout_secs = 1;
    let engine = h.engine(config);

    let id = engine.start_scan("10.0.0.1", ScanMode::Quick).unwrap();
    let pid = read_pid(&pid_file).await;
    let job = wait_terminal(&engine, id).await;

    assert_eq!(job.failure, Some(FailureKind::Timeout));
    assert_gone(pid).await;
}

#[tokio::test]
async fn test_cancel_kills_scanner_children() {
    let h = Harness::new();
    let pid_file = h.root().join("child.pid");
    let engine = h.engine(h.config(&background_sleeper(&pid_file)));

    let id = engine.start_scan("10.0.0.0/24", ScanMode::Full).unwrap();
    let pid = read_pid(&pid_file).await;
    assert!(is_running(pid));

    engine.cancel_scan(id).unwrap();
    let job = wait_terminal(&engine, id).await;

    assert_eq!(job.state, JobState::Cancelled);
    assert_gone(pid).await;
}

#[derive(Clone, Copy)]
enum Fault {
    /// The completion write fails with an I/O error.
    RejectCompletion,
    /// The worker panics while recording progress.
    PanicOnProgress,
}

/// File store that misbehaves on one kind of event.
struct FaultyStore {
    inner: FileJobStore,
    fault: Fault,
}

impl JobStore for FaultyStore {
    fn insert(&self, job: &ScanJob) -> Result<(), StoreError> {
        self.inner.insert(job)
    }

    fn get(&self, id: JobId) -> Result<JobRecord, StoreError> {
        self.inner.get(id)
    }

    fn job(&self, id: JobId) -> Result<ScanJob, StoreError> {
        self.inner.job(id)
    }

    fn list(&self) -> Result<Vec<ScanJob>, StoreError> {
        self.inner.list()
    }

    fn apply(&self, id: JobId, event: JobEvent) -> Result<ScanJob, StoreError> {
        match (self.fault, &event) {
            (Fault::RejectCompletion, JobEvent::Completed { .. }) => {
                Err(StoreError::Io(std::io::Error::other("disk full")))
            }
            (Fault::PanicOnProgress, JobEvent::Progress { .. }) => {
                panic!("progress write blew up")
            }
            _ => self.inner.apply(id, event),
        }
    }

    fn request_cancel(&self, id: JobId) -> Result<ScanJob, StoreError> {
        self.inner.request_cancel(id)
    }

    fn sweep_interrupted(&self) -> Result<Vec<JobId>, StoreError> {
        self.inner.sweep_interrupted()
    }
}

fn faulty_engine(h: &Harness, body: &str, fault: Fault) -> ScanEngine {
    let store = FaultyStore {
        inner: FileJobStore::open(h.root().join("data")).unwrap(),
        fault,
    };
    ScanEngine::new(h.config(body), Arc::new(store)).unwrap()
}

#[tokio::test]
async fn test_unrecordable_completion_still_ends_the_job() {
    let h = Harness::new();
    let engine = faulty_engine(&h, TWO_DEVICES, Fault::RejectCompletion);

    let id = engine.start_scan("192.168.1.0/24", ScanMode::Quick).unwrap();
    let job = wait_terminal(&engine, id).await;

    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.failure, Some(FailureKind::Process));
    assert!(
        job.status_message.starts_with("could not record outcome"),
        "{}",
        job.status_message
    );
    assert!(job.status_message.contains("disk full"));
    assert_eq!(
        engine.get_results(id),
        Err(ScanError::NotReady {
            state: JobState::Failed
        })
    );
}

#[tokio::test]
async fn test_worker_panic_fails_job_as_interrupted() {
    let h = Harness::new();
    let engine = faulty_engine(&h, TWO_DEVICES, Fault::PanicOnProgress);

    let id = engine.start_scan("192.168.1.0/24", ScanMode::Quick).unwrap();
    let job = wait_terminal(&engine, id).await;

    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.failure, Some(FailureKind::Interrupted));
    assert!(job.completed_at.is_some());

    timeout(Duration::from_secs(5), async {
        while engine.live_jobs() > 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("cancellation token outlived the panicked worker");

    // The pool keeps serving after a worker panic.
    let next = engine.start_scan("10.0.0.1", ScanMode::Quick).unwrap();
    assert!(wait_terminal(&engine, next).await.state.is_terminal());
}
