use crate::error::{Result, ScanError};
use crate::types::ResultSet;
use ::time::{format_description::well_known, OffsetDateTime};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Write one `Port: <label>\tState: <state>\tService: <service>` line per result.
pub fn write_lines<W: Write>(mut w: W, results: &ResultSet) -> io::Result<()> {
    match results {
        ResultSet::Connect(v) => {
            for r in v {
                writeln!(w, "{r}")?;
            }
        }
        ResultSet::Icmp(v) => {
            for r in v {
                writeln!(w, "{r}")?;
            }
        }
    }
    w.flush()
}

/// Create (or truncate) `path` and write the results in line format.
pub fn save_text(path: &Path, results: &ResultSet) -> Result<()> {
    let sink_err = |source: io::Error| ScanError::Sink { path: path.to_path_buf(), source };
    let file = File::create(path).map_err(sink_err)?;
    write_lines(BufWriter::new(file), results).map_err(sink_err)
}

#[derive(Serialize)]
struct JsonReport<'a> {
    host: &'a str,
    generated_at: String,
    #[serde(flatten)]
    results: &'a ResultSet,
}

/// Write the results as a pretty JSON report tagged with host and timestamp.
pub fn save_json(path: &Path, host: &str, results: &ResultSet) -> Result<()> {
    let sink_err = |source: io::Error| ScanError::Sink { path: path.to_path_buf(), source };
    let file = File::create(path).map_err(sink_err)?;
    let report = JsonReport { host, generated_at: now_rfc3339(), results };
    let mut w = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut w, &report).map_err(|e| sink_err(e.into()))?;
    w.flush().map_err(sink_err)
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
