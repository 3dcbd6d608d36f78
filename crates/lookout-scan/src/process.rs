//! External scanner process wrapper.
//!
//! Executes the scanner as a child process via `tokio::process::Command` and
//! supervises it until it exits, is cancelled, or runs past its deadline.
//! Progress is observed by polling the scanner's status file; the process is
//! never waited on in a way that blocks other jobs.
//!
//! On unix the scanner leads its own process group, and every kill targets
//! the whole group so that tools the scanner launched (nmap) die with it.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, Command};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use lookout_core::ScanMode;

use crate::config::ScanConfig;
use crate::document::{self, StatusReport, CANCEL_MARKER};
use crate::error::{Result, WorkerError};

/// Bytes of stderr kept for diagnostics.
const STDERR_TAIL_BYTES: usize = 4096;

/// How long to wait for stderr to drain after the scanner is gone.
const STDERR_DRAIN: Duration = Duration::from_millis(500);

/// Limits applied while a scanner runs.
#[derive(Debug, Clone)]
pub struct Supervision {
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub cancel_grace: Duration,
}

impl Supervision {
    pub fn for_mode(config: &ScanConfig, mode: ScanMode) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            timeout: config.timeout_for(mode),
            cancel_grace: config.cancel_grace(),
        }
    }
}

/// How a supervised scanner run ended.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// The process exited on its own. `code` is `None` if killed by a signal.
    Exited { code: Option<i32>, stderr: String },
    /// Cancellation was observed; the process has been terminated.
    Cancelled,
    /// The deadline passed; the process has been killed.
    TimedOut,
}

/// The external scanner invocation.
#[derive(Debug, Clone)]
pub struct ScannerCommand {
    program: String,
    leading_args: Vec<String>,
}

impl ScannerCommand {
    pub fn new(program: impl Into<String>, leading_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            leading_args,
        }
    }

    pub fn from_config(config: &ScanConfig) -> Self {
        Self::new(config.scanner_program.clone(), config.scanner_args.clone())
    }

    fn command(&self, targets: &str, mode: ScanMode, dir: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args)
            .arg(targets)
            .arg(mode.as_arg())
            .arg(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    /// Run the scanner against `targets`, writing into `dir`.
    ///
    /// `on_status` is called whenever the scanner's status file changes.
    /// Returns `Err` only if the process could not be started or waited on.
    pub async fn run<F>(
        &self,
        targets: &str,
        mode: ScanMode,
        dir: &Path,
        supervision: &Supervision,
        cancel: &CancellationToken,
        mut on_status: F,
    ) -> Result<ProcessOutcome>
    where
        F: FnMut(StatusReport),
    {
        let mut child = self
            .command(targets, mode, dir)
            .spawn()
            .map_err(|source| WorkerError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let group = ProcessGroup::new(child.id());
        tracing::debug!(
            pid = child.id(),
            program = %self.program,
            targets = %targets,
            mode = %mode,
            "Scanner process spawned"
        );

        let mut stderr_task = child.stderr.take().map(|s| tokio::spawn(read_tail(s)));
        let deadline = Instant::now() + supervision.timeout;
        let mut ticker = time::interval(supervision.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_report: Option<StatusReport> = None;

        let outcome = loop {
            tokio::select! {
                status = child.wait() => {
                    let status = status?;
                    break ProcessOutcome::Exited { code: status.code(), stderr: String::new() };
                }
                _ = cancel.cancelled() => {
                    terminate(&mut child, &group, dir, supervision.cancel_grace).await;
                    break ProcessOutcome::Cancelled;
                }
                _ = time::sleep_until(deadline) => {
                    kill(&mut child, &group).await;
                    break ProcessOutcome::TimedOut;
                }
                _ = ticker.tick() => {
                    if let Some(report) = document::read_status(dir).await {
                        if last_report.as_ref() != Some(&report) {
                            on_status(report.clone());
                            last_report = Some(report);
                        }
                    }
                }
            }
        };

        // Reap anything the scanner left running, whatever the outcome.
        group.kill();

        let tail = match stderr_task.as_mut() {
            Some(task) => match time::timeout(STDERR_DRAIN, &mut *task).await {
                Ok(Ok(tail)) => tail,
                _ => {
                    task.abort();
                    String::new()
                }
            },
            None => String::new(),
        };

        if !tail.is_empty() {
            tracing::debug!(stderr = %tail, "Scanner stderr");
        }

        Ok(match outcome {
            ProcessOutcome::Exited { code, .. } => ProcessOutcome::Exited { code, stderr: tail },
            other => other,
        })
    }
}

/// Ask the scanner to stop via its cancel marker, then kill it after `grace`.
async fn terminate(child: &mut Child, group: &ProcessGroup, dir: &Path, grace: Duration) {
    if let Err(e) = tokio::fs::write(dir.join(CANCEL_MARKER), b"").await {
        tracing::warn!(error = %e, "Failed to write cancel marker");
    }

    if !grace.is_zero() {
        if let Ok(Ok(status)) = time::timeout(grace, child.wait()).await {
            tracing::debug!(code = ?status.code(), "Scanner stopped after cancel marker");
            return;
        }
    }

    kill(child, group).await;
}

async fn kill(child: &mut Child, group: &ProcessGroup) {
    group.kill();
    if let Err(e) = child.kill().await {
        tracing::warn!(error = %e, "Failed to kill scanner process");
    }
}

/// The scanner's process group. Dropping it kills every remaining member,
/// so an abandoned run (worker panic) leaves nothing behind either.
struct ProcessGroup {
    #[cfg_attr(not(unix), allow(dead_code))]
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn new(leader: Option<u32>) -> Self {
        Self { pgid: leader }
    }

    #[cfg(unix)]
    fn kill(&self) {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Some(pgid) = self.pgid else {
            return;
        };
        match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
            // Group already empty.
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => tracing::warn!(pgid, error = %e, "Failed to kill scanner process group"),
        }
    }

    #[cfg(not(unix))]
    fn kill(&self) {}
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Collect the last `STDERR_TAIL_BYTES` of the scanner's stderr.
async fn read_tail(mut stderr: ChildStderr) -> String {
    let mut tail = Vec::new();
    let mut buf = [0u8; 4096];

    loop {
        match stderr.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&buf[..n]);
                if tail.len() > STDERR_TAIL_BYTES {
                    let excess = tail.len() - STDERR_TAIL_BYTES;
                    tail.drain(..excess);
                }
            }
        }
    }

    String::from_utf8_lossy(&tail).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervision(timeout: Duration) -> Supervision {
        Supervision {
            poll_interval: Duration::from_millis(20),
            timeout,
            cancel_grace: Duration::ZERO,
        }
    }

    /// `sh -c <script> scanner <targets> <mode> <dir>`: the script sees the
    /// scanner arguments as `$1 $2 $3`.
    fn shell(script: &str) -> ScannerCommand {
        ScannerCommand::new("sh", vec!["-c".into(), script.into(), "scanner".into()])
    }

    #[tokio::test]
    async fn missing_program_is_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = ScannerCommand::new("/nonexistent/lookout-scanner", vec![]);
        let err = cmd
            .run(
                "10.0.0.1",
                ScanMode::Quick,
                dir.path(),
                &supervision(Duration::from_secs(5)),
                &CancellationToken::new(),
                |_| {},
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_exit_code_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = shell(r#"echo "bad target $1 ($2)" >&2; exit 3"#);
        let outcome = cmd
            .run(
                "10.0.0.1",
                ScanMode::Full,
                dir.path(),
                &supervision(Duration::from_secs(5)),
                &CancellationToken::new(),
                |_| {},
            )
            .await
            .unwrap();

        match outcome {
            ProcessOutcome::Exited { code, stderr } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "bad target 10.0.0.1 (full)");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn reports_status_changes() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = shell(
            r#"echo '{"progress": 50, "message": "half"}' > "$3/status.json"; sleep 0.3; exit 0"#,
        );
        let mut reports = Vec::new();
        let outcome = cmd
            .run(
                "10.0.0.1",
                ScanMode::Quick,
                dir.path(),
                &supervision(Duration::from_secs(5)),
                &CancellationToken::new(),
                |r| reports.push(r),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, ProcessOutcome::Exited { code: Some(0), .. }));
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].percent(), Some(50));
        assert_eq!(reports[0].message.as_deref(), Some("half"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn deadline_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let started = Instant::now();
        let outcome = shell("exec sleep 30")
            .run(
                "10.0.0.1",
                ScanMode::Quick,
                dir.path(),
                &supervision(Duration::from_millis(200)),
                &CancellationToken::new(),
                |_| {},
            )
            .await
            .unwrap();

        assert!(matches!(outcome, ProcessOutcome::TimedOut));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    /// Whether `pid` is a live (non-zombie) process.
    #[cfg(unix)]
    fn is_running(pid: i32) -> bool {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        if let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            let state = stat.rsplit(')').next().unwrap_or("").trim_start();
            return !state.starts_with('Z');
        }
        kill(Pid::from_raw(pid), None).is_ok()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn deadline_kills_background_children() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("child.pid");
        let outcome = shell(r#"sleep 30 & echo $! > "$3/child.pid"; wait"#)
            .run(
                "10.0.0.1",
                ScanMode::Quick,
                dir.path(),
                &supervision(Duration::from_millis(300)),
                &CancellationToken::new(),
                |_| {},
            )
            .await
            .unwrap();
        assert!(matches!(outcome, ProcessOutcome::TimedOut));

        let pid: i32 = std::fs::read_to_string(pid_file).unwrap().trim().parse().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while is_running(pid) && Instant::now() < deadline {
            time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!is_running(pid), "background child {pid} survived the kill");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancel_marker_lets_scanner_stop_itself() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let mut sup = supervision(Duration::from_secs(30));
        sup.cancel_grace = Duration::from_secs(10);
        let started = Instant::now();
        let outcome = shell(r#"while [ ! -f "$3/cancel" ]; do sleep 0.05; done; exit 0"#)
            .run("10.0.0.1", ScanMode::Quick, dir.path(), &sup, &cancel, |_| {})
            .await
            .unwrap();

        assert!(matches!(outcome, ProcessOutcome::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(dir.path().join(CANCEL_MARKER).exists());
    }
}
