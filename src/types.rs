use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Probe strategy. `Icmp` is never handled by the connect prober.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "icmp" => Ok(Protocol::Icmp),
            other => Err(format!("unsupported protocol: {other}")),
        }
    }
}

/// Terminal outcome of a TCP/UDP probe.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    Open,
    Closed,
    Unknown,
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PortState::Open => "Open",
            PortState::Closed => "Closed",
            PortState::Unknown => "Unknown",
        })
    }
}

/// One TCP/UDP probe result for a single port.
///
/// `service` is only filled for open ports; closed and unknown results carry
/// an empty service name.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub port: u16,
    pub protocol: Protocol,
    pub state: PortState,
    pub service: String,
}

impl ProbeResult {
    /// Label such as `80/tcp`.
    pub fn port_label(&self) -> String {
        format!("{}/{}", self.port, self.protocol)
    }

    /// UDP connects succeed without any reply from the peer, so only TCP
    /// states say something definite about the remote port.
    pub fn is_authoritative(&self) -> bool {
        self.protocol == Protocol::Tcp
    }
}

impl fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_line(f, &self.port_label(), self.state, &self.service)
    }
}

/// Outcome of an ICMP echo probe. Unreachable replies and silence are both `Closed`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoState {
    Open,
    Closed,
}

impl From<EchoState> for PortState {
    fn from(s: EchoState) -> Self {
        match s {
            EchoState::Open => PortState::Open,
            EchoState::Closed => PortState::Closed,
        }
    }
}

impl fmt::Display for EchoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&PortState::from(*self), f)
    }
}

/// One ICMP echo result. `port` is only the correlation token of the probe.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IcmpProbeResult {
    pub port: u16,
    pub state: EchoState,
    pub service: String,
}

impl IcmpProbeResult {
    /// Label such as `443/icmp`.
    pub fn port_label(&self) -> String {
        format!("{}/{}", self.port, Protocol::Icmp)
    }
}

impl fmt::Display for IcmpProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_line(f, &self.port_label(), self.state.into(), &self.service)
    }
}

/// A homogeneous batch of results handed to the sink.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", content = "results", rename_all = "snake_case")]
pub enum ResultSet {
    Connect(Vec<ProbeResult>),
    Icmp(Vec<IcmpProbeResult>),
}

impl ResultSet {
    pub fn len(&self) -> usize {
        match self {
            ResultSet::Connect(v) => v.len(),
            ResultSet::Icmp(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of results whose state is open.
    pub fn open_count(&self) -> usize {
        match self {
            ResultSet::Connect(v) => v.iter().filter(|r| r.state == PortState::Open).count(),
            ResultSet::Icmp(v) => v.iter().filter(|r| r.state == EchoState::Open).count(),
        }
    }
}

fn write_line(f: &mut fmt::Formatter<'_>, label: &str, state: PortState, service: &str) -> fmt::Result {
    write!(f, "Port: {label}\tState: {state}\tService: {service}")
}
