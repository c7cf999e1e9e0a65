use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::error::ScanError;

/// Ports probed by the ICMP scan when the caller gives none.
pub const DEFAULT_PORTS: &[u16] = &[80, 443, 3389];

/// Outcome of parsing a port list: the accepted ports plus one error per rejected item.
#[derive(Debug, Default)]
pub struct ParsedPorts {
    pub ports: Vec<u16>,
    pub rejected: Vec<ScanError>,
}

/// Parse a port list into a deduplicated list of ports (0..=65535), keeping first-seen order.
///
/// Items are separated by commas or newlines. Supported items:
/// - single port number: `80`
/// - inclusive range: `8000-8010`
/// - comments: everything after `#` on a line is ignored
///
/// Invalid items are collected in `rejected`; parsing continues with the rest.
pub fn parse_port_list(s: &str) -> ParsedPorts {
    let mut out = ParsedPorts::default();
    let mut seen = HashSet::new();

    for raw_line in s.lines() {
        let line = raw_line.split('#').next().unwrap_or("");
        for item in line.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            match parse_item(item) {
                Ok((start, end)) => {
                    for p in start..=end {
                        if seen.insert(p) {
                            out.ports.push(p);
                        }
                    }
                }
                Err(e) => out.rejected.push(e),
            }
        }
    }

    out
}

/// Parse the caller's port list, falling back to [`DEFAULT_PORTS`] when none was given.
pub fn ports_or_default(input: Option<&str>) -> ParsedPorts {
    match input.map(str::trim) {
        Some(s) if !s.is_empty() => parse_port_list(s),
        _ => ParsedPorts { ports: DEFAULT_PORTS.to_vec(), rejected: Vec::new() },
    }
}

/// Load a port list from a file. Errors only if the file cannot be read.
pub fn load_ports_from_path(path: impl AsRef<Path>) -> Result<ParsedPorts> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read ports file: {}", path.as_ref().display()))?;
    Ok(parse_port_list(&content))
}

fn parse_item(item: &str) -> std::result::Result<(u16, u16), ScanError> {
    if let Some((a, b)) = item.split_once('-') {
        let start = parse_port_str(a.trim())?;
        let end = parse_port_str(b.trim())?;
        if start > end {
            return Err(invalid(item, format!("range start {start} is after end {end}")));
        }
        return Ok((start, end));
    }
    let p = parse_port_str(item)?;
    Ok((p, p))
}

fn parse_port_str(s: &str) -> std::result::Result<u16, ScanError> {
    let val: u32 = s.parse().map_err(|e| invalid(s, format!("{e}")))?;
    u16::try_from(val).map_err(|_| invalid(s, format!("port out of range: {val}")))
}

fn invalid(value: &str, reason: String) -> ScanError {
    ScanError::InvalidPort { value: value.to_string(), reason }
}
