//! Heuristic device classification for entries the scanner left unclassified.

const ROUTER_VENDORS: &[&str] = &["cisco", "juniper", "arista", "mikrotik", "ubiquiti"];
const FIREWALL_VENDORS: &[&str] = &["firewall", "fortinet", "palo alto", "sonicwall"];
const SERVER_OS: &[&str] = &["server", "linux", "freebsd"];
const ROUTER_OS: &[&str] = &["router", "ios", "nx-os", "junos", "routeros"];
const SWITCH_OS: &[&str] = &["switch", "catos"];

const PORT_BGP: u16 = 179;
const PORT_SNMP: u16 = 161;
const PORT_RDP: u16 = 3389;
const PORT_PRINTER: u16 = 9100;
const PORT_HTTP: u16 = 80;
const PORT_HTTPS: u16 = 443;

/// Guess a device type from vendor, OS fingerprint, and open ports, in that
/// order of precedence.
pub fn infer_device_type(os_guess: Option<&str>, vendor: Option<&str>, open_ports: &[u16]) -> &'static str {
    let vendor = vendor.unwrap_or_default().to_lowercase();
    let os = os_guess.unwrap_or_default().to_lowercase();
    let any = |haystack: &str, needles: &[&str]| needles.iter().any(|n| haystack.contains(n));

    if any(&vendor, ROUTER_VENDORS) {
        return "Router";
    }
    if vendor.contains("switch") {
        return "Switch";
    }
    if any(&vendor, FIREWALL_VENDORS) {
        return "Firewall";
    }
    if any(&os, SERVER_OS) {
        return "Server";
    }
    if any(&os, ROUTER_OS) {
        return "Router";
    }
    if any(&os, SWITCH_OS) {
        return "Switch";
    }
    if os.contains("windows") {
        return "Workstation";
    }

    let has = |port: u16| open_ports.contains(&port);
    if has(PORT_BGP) {
        "Router"
    } else if has(PORT_SNMP) {
        "Switch"
    } else if has(PORT_RDP) {
        "Workstation"
    } else if has(PORT_PRINTER) {
        "Printer"
    } else if has(PORT_HTTP) || has(PORT_HTTPS) {
        "Server"
    } else {
        "Unknown"
    }
}
