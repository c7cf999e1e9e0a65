use crate::config::ScanConfig;
use crate::services;
use crate::types::{PortState, ProbeResult, Protocol};
use log::{debug, info, trace, warn};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time;
use tokio_util::sync::CancellationToken;

/// Port bounds of the "initial" scan.
pub const INITIAL_RANGE: (u16, u16) = (0, 1024);
/// Port bounds of the "wide" scan.
pub const WIDE_RANGE: (u16, u16) = (0, 49152);

/// Probe a single port with one connection attempt bounded by `timeout`.
///
/// - Any connect failure (refused, timed out, unreachable, unresolvable host) is `Closed`.
/// - On success the connection is dropped at once and the service name is looked up.
/// - `Protocol::Icmp` is not a connect protocol; it yields `Unknown` without touching the network.
///
/// UDP has no handshake, so a UDP `Open` only means the local socket could be
/// connected; see [`ProbeResult::is_authoritative`].
pub async fn probe(protocol: Protocol, host: &str, port: u16, timeout: Duration) -> ProbeResult {
    let state = match protocol {
        Protocol::Tcp => classify(protocol, host, port, time::timeout(timeout, connect_tcp(host, port)).await),
        Protocol::Udp => classify(protocol, host, port, time::timeout(timeout, connect_udp(host, port)).await),
        Protocol::Icmp => {
            debug!("{port}/{protocol}: not a connect protocol, skipping");
            PortState::Unknown
        }
    };

    let service = services::service_for(port, state);
    ProbeResult { port, protocol, state, service }
}

/// Probe every port in `[lo, hi]` and return the results in ascending port order.
///
/// Up to `config.concurrency` probes are in flight at once. An empty range
/// (`lo > hi`) returns no results.
pub async fn scan_range(
    host: &str,
    protocol: Protocol,
    lo: u16,
    hi: u16,
    config: &ScanConfig,
) -> Vec<ProbeResult> {
    scan_range_with_cancel(host, protocol, lo, hi, config, CancellationToken::new()).await
}

/// Variant of [`scan_range`] that stops issuing probes once `cancel` fires.
/// Probes already in flight still complete and are reported.
pub async fn scan_range_with_cancel(
    host: &str,
    protocol: Protocol,
    lo: u16,
    hi: u16,
    config: &ScanConfig,
    cancel: CancellationToken,
) -> Vec<ProbeResult> {
    if lo > hi {
        return Vec::new();
    }

    info!("{protocol} scan of {host} ports {lo}-{hi}");
    let host: Arc<str> = Arc::from(host);
    let timeout = config.connect_timeout;
    let sem = Arc::new(Semaphore::new(config.concurrency.clamp(1, 5_000)));
    let mut set = JoinSet::new();

    for port in lo..=hi {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            permit = sem.clone().acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => break,
            },
        };
        let host = host.clone();

        set.spawn(async move {
            let _permit = permit; // keep permit until the probe completes
            probe(protocol, &host, port, timeout).await
        });
    }

    let mut results = Vec::with_capacity(usize::from(hi - lo) + 1);
    while let Some(res) = set.join_next().await {
        match res {
            Ok(r) => results.push(r),
            Err(e) => warn!("probe task failed: {e}"),
        }
    }
    results.sort_by_key(|r| r.port);

    if cancel.is_cancelled() {
        warn!("{protocol} scan of {host} cancelled after {} probes", results.len());
    }
    let open = results.iter().filter(|r| r.state == PortState::Open).count();
    info!("{protocol} scan of {host} done: {} probed, {open} open", results.len());
    results
}

/// UDP then TCP over [`INITIAL_RANGE`], concatenated.
pub async fn initial_scan(host: &str, config: &ScanConfig, cancel: CancellationToken) -> Vec<ProbeResult> {
    udp_then_tcp(host, INITIAL_RANGE, config, cancel).await
}

/// UDP then TCP over [`WIDE_RANGE`], concatenated.
pub async fn wide_scan(host: &str, config: &ScanConfig, cancel: CancellationToken) -> Vec<ProbeResult> {
    udp_then_tcp(host, WIDE_RANGE, config, cancel).await
}

async fn udp_then_tcp(
    host: &str,
    (lo, hi): (u16, u16),
    config: &ScanConfig,
    cancel: CancellationToken,
) -> Vec<ProbeResult> {
    let mut results = scan_range_with_cancel(host, Protocol::Udp, lo, hi, config, cancel.clone()).await;
    results.extend(scan_range_with_cancel(host, Protocol::Tcp, lo, hi, config, cancel).await);
    results
}

async fn connect_tcp(host: &str, port: u16) -> io::Result<()> {
    let _stream = TcpStream::connect((host, port)).await?;
    Ok(())
}

async fn connect_udp(host: &str, port: u16) -> io::Result<()> {
    let addr = lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "host has no addresses"))?;
    let local: SocketAddr = match addr {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(addr).await
}

fn classify(
    protocol: Protocol,
    host: &str,
    port: u16,
    outcome: Result<io::Result<()>, time::error::Elapsed>,
) -> PortState {
    match outcome {
        Ok(Ok(())) => {
            debug!("{host} {port}/{protocol} open");
            PortState::Open
        }
        Ok(Err(e)) => {
            trace!("{host} {port}/{protocol} closed: {e}");
            PortState::Closed
        }
        Err(_) => {
            trace!("{host} {port}/{protocol} closed: timed out");
            PortState::Closed
        }
    }
}
