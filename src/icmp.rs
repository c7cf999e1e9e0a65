//! ICMP echo engine.
//!
//! One socket serves every probe of a scan. Each probe sends an echo request
//! whose sequence number is the probe's port (the correlation token). A single
//! blocking receiver loop reads replies, keeps only echo replies from the
//! target carrying this engine's identifier, and completes the matching
//! probe's oneshot. Probes that see no reply before the shared deadline are
//! `Closed`.

use crate::config::ScanConfig;
use crate::error::{Result, ScanError};
use crate::services;
use crate::types::{EchoState, IcmpProbeResult};
use log::{debug, info, trace, warn};
use pnet::packet::icmp::echo_reply::EchoReplyPacket;
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{IcmpCode, IcmpTypes};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::Packet;
use pnet::util::checksum;
use serde::Serialize;
use socket2::{Domain, Protocol as SockProtocol, SockAddr, Socket, Type};
use std::collections::{HashMap, HashSet};
use std::io::{self, Read};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::lookup_host;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

/// Largest datagram the receiver reads.
const RECV_BUFFER_LEN: usize = 1500;

/// Socket operations the engine needs. Sends may come from many tasks at once;
/// only the receiver loop calls `recv`.
pub trait EchoTransport: Send + Sync + 'static {
    /// Send one ICMP message to `dest`. A short write is an error.
    fn send_to(&self, packet: &[u8], dest: Ipv4Addr) -> io::Result<()>;

    /// Read one datagram including its IPv4 header.
    /// `Ok(None)` means nothing arrived within the poll interval.
    fn recv(&self, buf: &mut [u8]) -> io::Result<Option<usize>>;
}

/// Raw ICMPv4 socket bound to the wildcard address. Needs raw-socket privileges.
pub struct RawIcmpSocket {
    socket: Socket,
}

impl RawIcmpSocket {
    pub fn open(poll_interval: Duration) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(SockProtocol::ICMPV4))
            .map_err(ScanError::SocketOpen)?;
        let any = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
        socket.bind(&any.into()).map_err(ScanError::SocketOpen)?;
        // A zero timeout would mean "block forever".
        socket
            .set_read_timeout(Some(poll_interval.max(Duration::from_millis(1))))
            .map_err(ScanError::SocketOpen)?;
        Ok(Self { socket })
    }
}

impl EchoTransport for RawIcmpSocket {
    fn send_to(&self, packet: &[u8], dest: Ipv4Addr) -> io::Result<()> {
        let addr = SockAddr::from(SocketAddr::from((dest, 0)));
        let n = self.socket.send_to(packet, &addr)?;
        if n != packet.len() {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "short ICMP write"));
        }
        Ok(())
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match (&self.socket).read(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// A probe whose echo request could not be sent. It has no entry in
/// [`IcmpScan::results`].
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SendFailure {
    pub port: u16,
    pub reason: String,
}

/// Output of one ICMP scan. `results` are in completion order.
#[derive(Serialize, Debug, Clone, Default)]
pub struct IcmpScan {
    pub results: Vec<IcmpProbeResult>,
    pub send_failures: Vec<SendFailure>,
}

/// Fields of an echo reply that matter for correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoReply {
    pub source: Ipv4Addr,
    pub identifier: u16,
    pub sequence: u16,
}

/// Parse an IPv4 datagram carrying an ICMP echo reply. Anything else is `None`.
pub fn parse_echo_reply(datagram: &[u8]) -> Option<EchoReply> {
    let ip = Ipv4Packet::new(datagram)?;
    if ip.get_next_level_protocol() != IpNextHeaderProtocols::Icmp {
        return None;
    }
    let offset = usize::from(ip.get_header_length()) * 4;
    let reply = EchoReplyPacket::new(datagram.get(offset..)?)?;
    if reply.get_icmp_type() != IcmpTypes::EchoReply {
        return None;
    }
    Some(EchoReply {
        source: ip.get_source(),
        identifier: reply.get_identifier(),
        sequence: reply.get_sequence_number(),
    })
}

/// Pre-built echo request; only the sequence number and checksum change per probe.
#[derive(Debug, Clone)]
struct EchoTemplate {
    buf: Vec<u8>,
}

impl EchoTemplate {
    fn new(identifier: u16, payload: &[u8]) -> Self {
        let mut buf = vec![0u8; MutableEchoRequestPacket::minimum_packet_size() + payload.len()];
        if let Some(mut pkt) = MutableEchoRequestPacket::new(&mut buf) {
            pkt.set_icmp_type(IcmpTypes::EchoRequest);
            pkt.set_icmp_code(IcmpCode::new(0));
            pkt.set_identifier(identifier);
            pkt.set_payload(payload);
        }
        Self { buf }
    }

    fn packet_for(&self, token: u16) -> Vec<u8> {
        let mut buf = self.buf.clone();
        if let Some(mut pkt) = MutableEchoRequestPacket::new(&mut buf) {
            pkt.set_sequence_number(token);
            pkt.set_checksum(0);
            let sum = checksum(pkt.packet(), 1);
            pkt.set_checksum(sum);
        }
        buf
    }
}

type Pending = Arc<Mutex<HashMap<u16, oneshot::Sender<()>>>>;

enum ProbeOutcome {
    Done(IcmpProbeResult),
    SendFailed(SendFailure),
}

pub struct IcmpEngine<T = RawIcmpSocket> {
    transport: Arc<T>,
    identifier: u16,
    template: EchoTemplate,
}

impl IcmpEngine<RawIcmpSocket> {
    /// Open a raw ICMP socket. Fails if the process lacks raw-socket privileges.
    pub fn open(config: &ScanConfig) -> Result<Self> {
        let socket = RawIcmpSocket::open(config.icmp_poll_interval)?;
        Ok(Self::with_transport(socket, config))
    }
}

impl<T: EchoTransport> IcmpEngine<T> {
    /// Build an engine with a random echo identifier.
    pub fn with_transport(transport: T, config: &ScanConfig) -> Self {
        Self::with_identifier(transport, config, rand::random())
    }

    pub fn with_identifier(transport: T, config: &ScanConfig, identifier: u16) -> Self {
        Self {
            transport: Arc::new(transport),
            identifier,
            template: EchoTemplate::new(identifier, &config.icmp_payload),
        }
    }

    pub fn identifier(&self) -> u16 {
        self.identifier
    }

    /// Probe every distinct port in `ports` against `target`.
    ///
    /// All probes share one deadline `timeout` after the call starts. A probe
    /// whose reply arrives in time is `Open`; otherwise, or once `cancel`
    /// fires, it is `Closed`. Probes whose request cannot be sent are left out
    /// of `results` and listed in `send_failures`. Duplicate ports are probed once.
    pub async fn scan(
        &self,
        target: Ipv4Addr,
        ports: &[u16],
        timeout: Duration,
        cancel: CancellationToken,
    ) -> IcmpScan {
        let deadline = Instant::now() + timeout;
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let stop = cancel.child_token();

        let receiver = {
            let transport = self.transport.clone();
            let pending = pending.clone();
            let stop = stop.clone();
            let identifier = self.identifier;
            let deadline = deadline.into_std();
            tokio::task::spawn_blocking(move || {
                receive_replies(&*transport, identifier, target, deadline, &pending, &stop)
            })
        };

        info!("ICMP scan of {target}: {} ports, timeout {:?}", ports.len(), timeout);
        let mut seen = HashSet::new();
        let mut set = JoinSet::new();

        for &port in ports {
            if !seen.insert(port) {
                debug!("{port}/icmp requested twice, probing once");
                continue;
            }
            // Register before sending so a fast reply always finds its waiter.
            let (tx, rx) = oneshot::channel();
            pending.lock().await.insert(port, tx);

            let packet = self.template.packet_for(port);
            let transport = self.transport.clone();
            let pending = pending.clone();
            let cancel = cancel.clone();

            set.spawn(async move {
                let sent = tokio::task::spawn_blocking(move || transport.send_to(&packet, target))
                    .await
                    .unwrap_or_else(|e| Err(io::Error::new(io::ErrorKind::Other, e)));
                if let Err(e) = sent {
                    pending.lock().await.remove(&port);
                    return ProbeOutcome::SendFailed(SendFailure { port, reason: e.to_string() });
                }
                let state = tokio::select! {
                    reply = rx => match reply {
                        Ok(()) => EchoState::Open,
                        Err(_) => EchoState::Closed,
                    },
                    _ = time::sleep_until(deadline) => EchoState::Closed,
                    _ = cancel.cancelled() => EchoState::Closed,
                };
                let service = services::service_for(port, state.into());
                ProbeOutcome::Done(IcmpProbeResult { port, state, service })
            });
        }

        let mut scan = IcmpScan::default();
        while let Some(res) = set.join_next().await {
            match res {
                Ok(ProbeOutcome::Done(r)) => scan.results.push(r),
                Ok(ProbeOutcome::SendFailed(f)) => {
                    warn!("{}/icmp: echo request not sent: {}", f.port, f.reason);
                    scan.send_failures.push(f);
                }
                Err(e) => warn!("ICMP probe task failed: {e}"),
            }
        }

        stop.cancel();
        if let Err(e) = receiver.await {
            warn!("ICMP receiver failed: {e}");
        }
        pending.lock().await.clear();

        let open = scan.results.iter().filter(|r| r.state == EchoState::Open).count();
        info!("ICMP scan of {target} done: {} probed, {open} open", scan.results.len());
        scan
    }
}

/// Resolve `host` to its first IPv4 address. Literal addresses skip DNS.
pub async fn resolve_ipv4(host: &str) -> Result<Ipv4Addr> {
    let host = host.trim();
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(ip);
    }
    let unresolved = || ScanError::UnresolvedHost(host.to_string());
    let addrs = lookup_host((host, 0)).await.map_err(|_| unresolved())?;
    addrs
        .filter_map(|a| match a.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(unresolved)
}

/// Resolve `host`, open a raw ICMP socket and probe `ports` with `config.icmp_timeout`.
///
/// Resolution and socket failures are fatal: no probe is sent.
pub async fn scan_icmp(
    host: &str,
    ports: &[u16],
    config: &ScanConfig,
    cancel: CancellationToken,
) -> Result<IcmpScan> {
    let target = resolve_ipv4(host).await?;
    let engine = IcmpEngine::open(config)?;
    Ok(engine.scan(target, ports, config.icmp_timeout, cancel).await)
}

fn receive_replies<T: EchoTransport + ?Sized>(
    transport: &T,
    identifier: u16,
    target: Ipv4Addr,
    deadline: std::time::Instant,
    pending: &Pending,
    stop: &CancellationToken,
) {
    let mut buf = [0u8; RECV_BUFFER_LEN];
    while !stop.is_cancelled() && std::time::Instant::now() < deadline {
        let n = match transport.recv(&mut buf) {
            Ok(Some(n)) => n,
            Ok(None) => continue,
            Err(e) => {
                trace!("ICMP read failed: {e}");
                std::thread::sleep(Duration::from_millis(10));
                continue;
            }
        };
        let Some(reply) = parse_echo_reply(&buf[..n]) else {
            continue;
        };
        if reply.identifier != identifier || reply.source != target {
            trace!("ignoring echo reply from {} id {}", reply.source, reply.identifier);
            continue;
        }
        match pending.blocking_lock().remove(&reply.sequence) {
            Some(tx) => {
                debug!("{}/icmp: echo reply from {}", reply.sequence, reply.source);
                let _ = tx.send(());
            }
            None => trace!("echo reply for {} has no waiting probe", reply.sequence),
        }
    }
}
