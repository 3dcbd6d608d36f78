//! Nmap XML result documents.
//!
//! A scanner wrapper may hand back nmap's own `-oX` output instead of the
//! JSON device list. Only the parts that map onto a result entry are
//! deserialized; everything else in the document is ignored.

use serde::Deserialize;

use lookout_core::DeviceStatus;

use crate::error::{Result, WorkerError};

/// Root element: `<nmaprun>`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename = "nmaprun")]
pub struct NmapRun {
    #[serde(rename = "host", default)]
    pub hosts: Vec<NmapHost>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NmapHost {
    pub status: Option<HostStatus>,
    #[serde(rename = "address", default)]
    pub addresses: Vec<Address>,
    pub hostnames: Option<Hostnames>,
    pub ports: Option<Ports>,
    pub os: Option<OsMatches>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostStatus {
    #[serde(rename = "@state")]
    pub state: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Address {
    #[serde(rename = "@addr")]
    pub addr: String,
    #[serde(rename = "@addrtype")]
    pub addr_type: String,
    #[serde(rename = "@vendor")]
    pub vendor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hostnames {
    #[serde(rename = "hostname", default)]
    pub names: Vec<Hostname>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hostname {
    #[serde(rename = "@name")]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Ports {
    #[serde(rename = "port", default)]
    pub ports: Vec<NmapPort>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NmapPort {
    #[serde(rename = "@portid")]
    pub port_id: u16,
    pub state: PortState,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortState {
    #[serde(rename = "@state")]
    pub state: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsMatches {
    #[serde(rename = "osmatch", default)]
    pub matches: Vec<OsMatch>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsMatch {
    #[serde(rename = "@name")]
    pub name: String,
}

impl NmapHost {
    /// The host's IP address, IPv4 preferred.
    pub fn ip(&self) -> Option<&str> {
        self.address_of("ipv4").or_else(|| self.address_of("ipv6"))
    }

    pub fn mac(&self) -> Option<&str> {
        self.address_of("mac")
    }

    /// Vendor nmap derived from the MAC OUI.
    pub fn vendor(&self) -> Option<&str> {
        self.addresses
            .iter()
            .find(|a| a.addr_type == "mac")
            .and_then(|a| a.vendor.as_deref())
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostnames
            .as_ref()
            .and_then(|hn| hn.names.first())
            .map(|h| h.name.as_str())
    }

    pub fn status(&self) -> DeviceStatus {
        match self.status.as_ref().map(|s| s.state.as_str()) {
            Some("up") => DeviceStatus::Online,
            Some("down") => DeviceStatus::Offline,
            _ => DeviceStatus::Unknown,
        }
    }

    /// Open port numbers in document order.
    pub fn open_ports(&self) -> Vec<u16> {
        self.ports
            .iter()
            .flat_map(|p| &p.ports)
            .filter(|p| p.state.state == "open")
            .map(|p| p.port_id)
            .collect()
    }

    /// Best OS match (nmap lists the most accurate first).
    pub fn os_name(&self) -> Option<&str> {
        self.os
            .as_ref()
            .and_then(|os| os.matches.first())
            .map(|m| m.name.as_str())
    }

    fn address_of(&self, addr_type: &str) -> Option<&str> {
        self.addresses
            .iter()
            .find(|a| a.addr_type == addr_type)
            .map(|a| a.addr.as_str())
    }
}

/// Parse nmap XML bytes into a structured `NmapRun`.
pub fn parse_nmap_xml(xml: &[u8]) -> Result<NmapRun> {
    quick_xml::de::from_reader(xml).map_err(|e| WorkerError::Parse(format!("invalid nmap XML: {e}")))
}
