//! Scanner output contract: the files a scanner exchanges with its worker.
//!
//! Inside its private working directory the scanner writes exactly one
//! result document before exiting 0, either `results.json` (a JSON list of
//! devices) or `results.xml` (nmap `-oX` output). It may also keep
//! `status.json` up to date with its progress, and should stop early when a
//! `cancel` marker appears.

use std::cmp::Ordering;
use std::net::IpAddr;
use std::path::Path;

use serde::Deserialize;

use lookout_core::{DeviceStatus, ScanMode, ScanResultEntry};

use crate::classify::infer_device_type;
use crate::error::{Result, WorkerError};
use crate::nmap_xml::{self, NmapHost};

pub const RESULTS_JSON: &str = "results.json";
pub const RESULTS_XML: &str = "results.xml";
pub const STATUS_FILE: &str = "status.json";
pub const CANCEL_MARKER: &str = "cancel";

/// A parsed result document.
#[derive(Debug)]
pub struct ResultDocument {
    pub entries: Vec<ScanResultEntry>,
    /// BLAKE3 hex digest of the raw document bytes.
    pub digest: String,
}

/// Progress snapshot read from `status.json`. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct StatusReport {
    pub progress: Option<f64>,
    pub message: Option<String>,
}

impl StatusReport {
    pub fn percent(&self) -> Option<u8> {
        self.progress
            .filter(|p| p.is_finite())
            .map(|p| p.clamp(0.0, 100.0) as u8)
    }
}

/// Read the scanner's latest status snapshot, if there is a readable one.
///
/// The scanner rewrites this file while we read it, so a torn or missing
/// file is not an error; the next poll will see a complete one.
pub async fn read_status(dir: &Path) -> Option<StatusReport> {
    let bytes = tokio::fs::read(dir.join(STATUS_FILE)).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Locate and parse the result document in a finished scanner's directory.
pub async fn read_result_document(dir: &Path, mode: ScanMode) -> Result<ResultDocument> {
    let json_path = dir.join(RESULTS_JSON);
    if tokio::fs::try_exists(&json_path).await? {
        let bytes = tokio::fs::read(&json_path).await?;
        return Ok(ResultDocument {
            entries: parse_json_document(&bytes, mode)?,
            digest: digest(&bytes),
        });
    }

    let xml_path = dir.join(RESULTS_XML);
    if tokio::fs::try_exists(&xml_path).await? {
        let bytes = tokio::fs::read(&xml_path).await?;
        return Ok(ResultDocument {
            entries: parse_xml_document(&bytes, mode)?,
            digest: digest(&bytes),
        });
    }

    // A scanner that gives up still exits 0 but leaves its reason in the
    // status file.
    let reported = read_status(dir)
        .await
        .and_then(|s| s.message)
        .filter(|m| !m.trim().is_empty())
        .map(|m| format!(" (last status: {})", m.trim()))
        .unwrap_or_default();

    Err(WorkerError::Parse(format!(
        "scanner exited 0 without writing {RESULTS_JSON} or {RESULTS_XML}{reported}"
    )))
}

/// The JSON document is either a bare device list or an object wrapping one.
#[derive(Deserialize)]
#[serde(untagged)]
enum JsonDocument {
    List(Vec<RawDevice>),
    Wrapped {
        #[serde(alias = "hosts")]
        devices: Vec<RawDevice>,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDevice {
    ip_address: Option<String>,
    hostname: Option<String>,
    mac_address: Option<String>,
    device_type: Option<String>,
    status: Option<String>,
    #[serde(default)]
    open_ports: Vec<u16>,
    os_guess: Option<String>,
    vendor: Option<String>,
}

/// Parse a JSON device list. One bad device rejects the whole document.
pub fn parse_json_document(bytes: &[u8], mode: ScanMode) -> Result<Vec<ScanResultEntry>> {
    let doc: JsonDocument = serde_json::from_slice(bytes)
        .map_err(|e| WorkerError::Parse(format!("invalid {RESULTS_JSON}: {e}")))?;
    let devices = match doc {
        JsonDocument::List(devices) | JsonDocument::Wrapped { devices } => devices,
    };

    let entries = devices
        .into_iter()
        .enumerate()
        .map(|(i, raw)| {
            normalize(raw, mode).map_err(|e| WorkerError::Parse(format!("device #{i}: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(sorted_by_address(entries))
}

/// Parse nmap XML, keeping hosts that were up.
pub fn parse_xml_document(bytes: &[u8], mode: ScanMode) -> Result<Vec<ScanResultEntry>> {
    let run = nmap_xml::parse_nmap_xml(bytes)?;

    let entries = run
        .hosts
        .iter()
        .filter(|h| h.status() == DeviceStatus::Online)
        .map(|h| convert_nmap_host(h, mode))
        .collect::<Result<Vec<_>>>()?;

    Ok(sorted_by_address(entries))
}

fn convert_nmap_host(host: &NmapHost, mode: ScanMode) -> Result<ScanResultEntry> {
    let raw = RawDevice {
        ip_address: host.ip().map(String::from),
        hostname: host.hostname().map(String::from),
        mac_address: host.mac().map(String::from),
        device_type: None,
        status: host.status.as_ref().map(|s| s.state.clone()),
        open_ports: host.open_ports(),
        os_guess: host.os_name().map(String::from),
        vendor: host.vendor().map(String::from),
    };
    normalize(raw, mode).map_err(|e| WorkerError::Parse(format!("nmap host: {e}")))
}

/// Validate one device and bring it into canonical form.
fn normalize(raw: RawDevice, mode: ScanMode) -> std::result::Result<ScanResultEntry, String> {
    let ip_address = non_empty(raw.ip_address).ok_or("missing ipAddress")?;
    if ip_address.parse::<IpAddr>().is_err() {
        return Err(format!("invalid ipAddress {ip_address:?}"));
    }

    let status = match raw.status.map(|s| s.to_ascii_lowercase()).as_deref() {
        Some("online" | "up") => DeviceStatus::Online,
        Some("offline" | "down") => DeviceStatus::Offline,
        _ => DeviceStatus::Unknown,
    };

    let mut open_ports = raw.open_ports;
    match mode {
        // Discovery sweeps never report ports.
        ScanMode::Quick => open_ports.clear(),
        ScanMode::Full => {
            open_ports.sort_unstable();
            open_ports.dedup();
        }
    }

    let os_guess = non_empty(raw.os_guess);
    let vendor = non_empty(raw.vendor);
    let device_type = non_empty(raw.device_type)
        .filter(|t| !t.eq_ignore_ascii_case("unknown"))
        .unwrap_or_else(|| {
            infer_device_type(os_guess.as_deref(), vendor.as_deref(), &open_ports).to_string()
        });

    Ok(ScanResultEntry {
        ip_address,
        hostname: non_empty(raw.hostname),
        mac_address: non_empty(raw.mac_address),
        device_type,
        status,
        open_ports,
        os_guess,
        vendor,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn sorted_by_address(mut entries: Vec<ScanResultEntry>) -> Vec<ScanResultEntry> {
    entries.sort_by(|a, b| {
        match (a.ip_address.parse::<IpAddr>(), b.ip_address.parse::<IpAddr>()) {
            (Ok(a), Ok(b)) => a.cmp(&b),
            _ => Ordering::Equal,
        }
    });
    entries
}

fn digest(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}
