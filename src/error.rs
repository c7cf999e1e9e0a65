use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced to callers. Transient probe failures are not errors; they
/// become `Closed` results.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid port value `{value}`: {reason}")]
    InvalidPort { value: String, reason: String },

    #[error("cannot resolve `{0}` to an IPv4 address")]
    UnresolvedHost(String),

    #[error("failed to open ICMP socket: {0}")]
    SocketOpen(#[source] io::Error),

    #[error("failed to write results to {}: {source}", .path.display())]
    Sink {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ScanError>;
