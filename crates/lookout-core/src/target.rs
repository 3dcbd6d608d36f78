//! Syntactic validation of scan target specifications.
//!
//! Targets are a comma-separated list of IP addresses, CIDR networks,
//! IPv4 last-octet ranges (`192.168.1.10-50`), or hostnames. Nothing is
//! resolved here; the external scanner owns resolution.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use ipnet::IpNet;

use crate::error::ScanError;

const MAX_HOSTNAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// One item of a target list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Address(IpAddr),
    Network(IpNet),
    Range { start: Ipv4Addr, end_octet: u8 },
    Hostname(String),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(ip) => write!(f, "{ip}"),
            Self::Network(net) => write!(f, "{net}"),
            Self::Range { start, end_octet } => write!(f, "{start}-{end_octet}"),
            Self::Hostname(name) => f.write_str(name),
        }
    }
}

/// A validated target list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    targets: Vec<Target>,
}

impl TargetSpec {
    /// Validate a raw target string.
    pub fn parse(raw: &str) -> Result<Self, ScanError> {
        if raw.trim().is_empty() {
            return Err(ScanError::Validation("targets must not be empty".into()));
        }

        let targets = raw
            .split(',')
            .map(|item| parse_target(item.trim()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { targets })
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Canonical comma-joined form, as stored on the job and passed to the scanner.
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, target) in self.targets.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{target}")?;
        }
        Ok(())
    }
}

fn parse_target(item: &str) -> Result<Target, ScanError> {
    if item.is_empty() {
        return Err(ScanError::Validation("empty item in target list".into()));
    }

    if item.contains('/') {
        return item
            .parse::<IpNet>()
            .map(Target::Network)
            .map_err(|_| ScanError::Validation(format!("invalid CIDR network: {item}")));
    }

    if let Ok(ip) = item.parse::<IpAddr>() {
        return Ok(Target::Address(ip));
    }

    if let Some((start, end)) = item.rsplit_once('-') {
        if let Ok(start) = start.parse::<Ipv4Addr>() {
            let end_octet = end
                .parse::<u8>()
                .map_err(|_| ScanError::Validation(format!("invalid address range: {item}")))?;
            if end_octet < start.octets()[3] {
                return Err(ScanError::Validation(format!(
                    "address range ends before it starts: {item}"
                )));
            }
            return Ok(Target::Range { start, end_octet });
        }
    }

    if is_valid_hostname(item) {
        return Ok(Target::Hostname(item.to_ascii_lowercase()));
    }

    Err(ScanError::Validation(format!(
        "invalid target: {item} (expected IP address, CIDR, range, or hostname)"
    )))
}

fn is_valid_hostname(name: &str) -> bool {
    let name = name.strip_suffix('.').unwrap_or(name);
    if name.is_empty() || name.len() > MAX_HOSTNAME_LEN {
        return false;
    }

    let labels: Vec<&str> = name.split('.').collect();

    // All-numeric names are malformed addresses, not hostnames.
    if labels
        .iter()
        .all(|l| !l.is_empty() && l.bytes().all(|b| b.is_ascii_digit()))
    {
        return false;
    }

    labels.iter().all(|label| {
        !label.is_empty()
            && label.len() <= MAX_LABEL_LEN
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    })
}
