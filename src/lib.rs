//! Library crate for portprobe: single-host TCP/UDP connect and ICMP echo probing.
pub mod config;
pub mod error;
pub mod icmp;
pub mod ports;
pub mod scanner;
pub mod services;
pub mod sink;
pub mod types;

pub use config::ScanConfig;
pub use error::{Result, ScanError};
pub use types::{EchoState, IcmpProbeResult, PortState, ProbeResult, Protocol, ResultSet};
