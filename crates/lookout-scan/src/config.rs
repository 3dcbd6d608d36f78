//! Configuration for the scan engine.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use lookout_core::ScanMode;

/// Engine configuration, passed to [`crate::ScanEngine::new`] at construction.
///
/// Loaded from the `[scan]` section of `lookout.toml` or
/// `LOOKOUT_SCAN__` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    /// Program used to run the external scanner (default: "python3").
    #[serde(default = "default_scanner_program")]
    pub scanner_program: String,

    /// Leading arguments, placed before `(targets, mode, output_dir)`.
    #[serde(default = "default_scanner_args")]
    pub scanner_args: Vec<String>,

    /// Directory holding the job record store.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Parent of the per-job private working directories.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Maximum scanner processes running at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_scans: usize,

    /// Jobs that may wait for a free worker slot before dispatch is refused.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How often a worker checks the scanner's status channel.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_quick_timeout")]
    pub quick_timeout_secs: u64,

    #[serde(default = "default_full_timeout")]
    pub full_timeout_secs: u64,

    /// Time a cancelled scanner gets to exit on its own before it is killed.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,

    /// Keep working directories after a job ends (debugging aid).
    #[serde(default)]
    pub keep_work_dirs: bool,
}

impl ScanConfig {
    /// Maximum wall-clock duration of a scan in the given mode.
    pub fn timeout_for(&self, mode: ScanMode) -> Duration {
        match mode {
            ScanMode::Quick => Duration::from_secs(self.quick_timeout_secs),
            ScanMode::Full => Duration::from_secs(self.full_timeout_secs),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

fn default_scanner_program() -> String {
    "python3".to_string()
}

fn default_scanner_args() -> Vec<String> {
    vec!["scripts/scanner.py".to_string()]
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("./scans")
}

fn default_max_concurrent() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    64
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_quick_timeout() -> u64 {
    120
}

fn default_full_timeout() -> u64 {
    1800
}

fn default_cancel_grace_ms() -> u64 {
    2000
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            scanner_program: default_scanner_program(),
            scanner_args: default_scanner_args(),
            data_dir: default_data_dir(),
            work_dir: default_work_dir(),
            max_concurrent_scans: default_max_concurrent(),
            queue_capacity: default_queue_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
            quick_timeout_secs: default_quick_timeout(),
            full_timeout_secs: default_full_timeout(),
            cancel_grace_ms: default_cancel_grace_ms(),
            keep_work_dirs: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ScanConfig::default();
        assert_eq!(config.scanner_program, "python3");
        assert_eq!(config.scanner_args, vec!["scripts/scanner.py"]);
        assert_eq!(config.max_concurrent_scans, 4);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert!(!config.keep_work_dirs);
    }

    #[test]
    fn test_timeouts_per_mode() {
        let config = ScanConfig::default();
        assert_eq!(config.timeout_for(ScanMode::Quick), Duration::from_secs(120));
        assert_eq!(config.timeout_for(ScanMode::Full), Duration::from_secs(1800));
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let config: ScanConfig =
            serde_json::from_str(r#"{"scanner_program": "sh", "quick_timeout_secs": 5}"#).unwrap();
        assert_eq!(config.scanner_program, "sh");
        assert_eq!(config.quick_timeout_secs, 5);
        assert_eq!(config.full_timeout_secs, 1800);
        assert_eq!(config.queue_capacity, 64);
    }
}
