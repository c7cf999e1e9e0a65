use std::time::Duration;

/// Payload carried by every echo request.
pub const DEFAULT_ICMP_PAYLOAD: &[u8] = b"HELLO-RPC";

/// Engine-scoped scan settings.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Bound on a single TCP/UDP connect attempt.
    pub connect_timeout: Duration,
    /// Max in-flight connect probes during a range scan. `1` is strictly sequential.
    pub concurrency: usize,
    /// Overall budget shared by every probe of one ICMP scan.
    pub icmp_timeout: Duration,
    /// Per-read deadline of the ICMP receiver loop.
    pub icmp_poll_interval: Duration,
    pub icmp_payload: Vec<u8>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(1000),
            concurrency: 256,
            icmp_timeout: Duration::from_secs(5),
            icmp_poll_interval: Duration::from_millis(100),
            icmp_payload: DEFAULT_ICMP_PAYLOAD.to_vec(),
        }
    }
}

impl ScanConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_icmp_timeout(mut self, timeout: Duration) -> Self {
        self.icmp_timeout = timeout;
        self
    }

    pub fn with_icmp_poll_interval(mut self, interval: Duration) -> Self {
        self.icmp_poll_interval = interval;
        self
    }
}
