use crate::types::PortState;

/// Well-known ports and the service names reported for them.
const COMMON_SERVICES: &[(u16, &str)] = &[
    (21, "FTP"),
    (22, "SSH"),
    (23, "Telnet"),
    (25, "SMTP"),
    (53, "DNS"),
    (80, "HTTP"),
    (110, "POP3"),
    (143, "IMAP"),
    (443, "HTTPS"),
    (3389, "RDP"),
];

/// Name reported for ports missing from the catalog.
pub const UNKNOWN_SERVICE: &str = "Unknown";

/// Look up the service name for a port, or `"Unknown"` if the port is not cataloged.
pub fn lookup(port: u16) -> &'static str {
    COMMON_SERVICES
        .iter()
        .find(|(p, _)| *p == port)
        .map(|(_, name)| *name)
        .unwrap_or(UNKNOWN_SERVICE)
}

/// Service name reported in a result: the catalog name for open ports, empty otherwise.
pub fn service_for(port: u16, state: PortState) -> String {
    match state {
        PortState::Open => lookup(port).to_string(),
        PortState::Closed | PortState::Unknown => String::new(),
    }
}
