use portprobe::scanner::{initial_scan, probe, scan_range, INITIAL_RANGE};
use portprobe::services;
use portprobe::{PortState, Protocol, ScanConfig};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_millis(500);

/// A loopback port that had a listener a moment ago and now has none.
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn listening_port_is_open_with_service() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let r = probe(Protocol::Tcp, "127.0.0.1", port, TIMEOUT).await;
    assert_eq!(r.state, PortState::Open);
    assert_eq!(r.port_label(), format!("{port}/tcp"));
    assert_eq!(r.service, services::lookup(port));
}

#[tokio::test]
async fn closed_port_is_closed_every_time() {
    let port = closed_port().await;
    for _ in 0..2 {
        let r = probe(Protocol::Tcp, "127.0.0.1", port, TIMEOUT).await;
        assert_eq!(r.state, PortState::Closed);
        assert!(r.service.is_empty());
    }
}

#[tokio::test]
async fn explicit_open_and_closed_ports() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let open = listener.local_addr().unwrap().port();
    let closed = closed_port().await;

    let mut results = Vec::new();
    for port in [open, closed] {
        results.push(probe(Protocol::Tcp, "localhost", port, TIMEOUT).await);
    }
    assert_eq!(results[0].state, PortState::Open);
    assert_eq!(results[1].state, PortState::Closed);
    assert_eq!(results[1].service, "");
}

#[tokio::test]
async fn ssh_port_and_unlisted_port() {
    // Binding port 22 needs privileges; an sshd already listening serves as well.
    let _listener = TcpListener::bind("127.0.0.1:22").await.ok();
    let ssh = probe(Protocol::Tcp, "127.0.0.1", 22, TIMEOUT).await;
    if ssh.state != PortState::Open {
        eprintln!("skipping: nothing listens on 127.0.0.1:22");
        return;
    }
    assert_eq!(ssh.port_label(), "22/tcp");
    assert_eq!(ssh.service, "SSH");

    let closed = closed_port().await;
    let other = probe(Protocol::Tcp, "127.0.0.1", closed, TIMEOUT).await;
    assert_eq!(other.state, PortState::Closed);
    assert_eq!(other.service, "");
}

#[tokio::test]
async fn udp_connect_to_loopback_reports_best_effort_open() {
    let r = probe(Protocol::Udp, "127.0.0.1", 9, TIMEOUT).await;
    assert_eq!(r.port_label(), "9/udp");
    assert_eq!(r.state, PortState::Open);
    assert!(!r.is_authoritative());
}

#[tokio::test]
async fn range_yields_one_ordered_result_per_port() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (lo, hi) = (port.saturating_sub(5), port.saturating_add(5));

    for concurrency in [1, 4] {
        let cfg = ScanConfig::default().with_connect_timeout(TIMEOUT).with_concurrency(concurrency);
        let results = scan_range("127.0.0.1", Protocol::Tcp, lo, hi, &cfg).await;

        assert_eq!(results.len(), usize::from(hi - lo) + 1);
        for (r, p) in results.iter().zip(lo..=hi) {
            assert_eq!(r.port_label(), format!("{p}/tcp"));
        }
        let open: Vec<_> = results.iter().filter(|r| r.state == PortState::Open).map(|r| r.port).collect();
        assert!(open.contains(&port));
    }
}

#[tokio::test]
async fn single_port_and_empty_ranges() {
    let cfg = ScanConfig::default().with_connect_timeout(TIMEOUT);
    let port = closed_port().await;

    let one = scan_range("127.0.0.1", Protocol::Tcp, port, port, &cfg).await;
    assert_eq!(one.len(), 1);
    assert_eq!(one[0].port, port);

    let none = scan_range("127.0.0.1", Protocol::Tcp, port, port - 1, &cfg).await;
    assert!(none.is_empty());
}

#[tokio::test]
async fn icmp_range_makes_unknown_results() {
    let cfg = ScanConfig::default();
    let results = scan_range("127.0.0.1", Protocol::Icmp, 1, 3, &cfg).await;
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.state == PortState::Unknown));
}

#[tokio::test(flavor = "multi_thread")]
async fn initial_scan_is_udp_block_then_tcp_block() {
    let cfg = ScanConfig::default().with_connect_timeout(TIMEOUT).with_concurrency(512);
    let results = initial_scan("127.0.0.1", &cfg, CancellationToken::new()).await;

    let span = usize::from(INITIAL_RANGE.1 - INITIAL_RANGE.0) + 1;
    assert_eq!(results.len(), 2 * span);
    assert!(results[..span].iter().all(|r| r.protocol == Protocol::Udp));
    assert!(results[span..].iter().all(|r| r.protocol == Protocol::Tcp));
    assert_eq!(results[0].port_label(), "0/udp");
    assert_eq!(results[span].port_label(), "0/tcp");
    assert_eq!(results[2 * span - 1].port_label(), "1024/tcp");
}
