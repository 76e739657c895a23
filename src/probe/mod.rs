//! Active latency measurement of dashboard nodes over TCP and TLS.
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::Node;

pub mod dialer;

pub use dialer::{Dialer, NetDialer};

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Timed out")]
    Timeout,
    #[error("Failed to resolve host: {0}")]
    Resolve(String),
    #[error("Connection failed: {0}")]
    Connect(#[from] std::io::Error),
    #[error("TLS handshake failed: {0}")]
    Tls(String),
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// TCP ports tried independently; the fastest success counts.
    pub ports: Vec<u16>,
    pub tls_port: u16,
    /// Upper bound for each resolve, connect, and handshake attempt.
    pub connect_timeout: Duration,
    /// Nodes silent on the dashboard for longer than this are not probed.
    pub offline_threshold_secs: i64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            ports: vec![443, 80, 22],
            tls_port: 443,
            connect_timeout: Duration::from_secs(3),
            offline_threshold_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMethod {
    Tcp,
    Tls,
}

impl fmt::Display for ProbeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeMethod::Tcp => f.write_str("TCP"),
            ProbeMethod::Tls => f.write_str("TLS"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnreachableReason {
    NoAddress,
    Stale { idle_secs: i64 },
    NoResponse,
}

impl fmt::Display for UnreachableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnreachableReason::NoAddress => f.write_str("no address"),
            UnreachableReason::Stale { idle_secs } => write!(f, "silent for {idle_secs}s"),
            UnreachableReason::NoResponse => f.write_str("no response"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Latency {
    Measured { millis: u64, via: ProbeMethod },
    Unreachable(UnreachableReason),
}

impl Latency {
    /// Rounds up so a measured value is never the `0` sentinel.
    pub fn measured(elapsed: Duration, via: ProbeMethod) -> Self {
        let millis = elapsed.as_micros().div_ceil(1000).max(1);
        Latency::Measured {
            millis: u64::try_from(millis).unwrap_or(u64::MAX),
            via,
        }
    }

    /// Milliseconds as stored in the history; `0` means unreachable.
    pub fn millis(&self) -> u64 {
        match self {
            Latency::Measured { millis, .. } => *millis,
            Latency::Unreachable(_) => 0,
        }
    }

    pub fn is_reachable(&self) -> bool {
        matches!(self, Latency::Measured { .. })
    }
}

pub struct LatencyProbe<D> {
    dialer: D,
    config: ProbeConfig,
}

impl<D: Dialer> LatencyProbe<D> {
    pub fn new(dialer: D, config: ProbeConfig) -> Self {
        Self { dialer, config }
    }

    /// Measures one node. `now` is UTC epoch seconds. Never fails: every
    /// error along the way degrades to a slower method or to `Unreachable`.
    pub async fn probe(&self, node: &Node, now: i64) -> Latency {
        let Some(host) = node.host.as_deref() else {
            debug!(node = %node.name, "No address reported; skipping probe.");
            return Latency::Unreachable(UnreachableReason::NoAddress);
        };
        if let Some(idle_secs) = node.idle_seconds(now) {
            if idle_secs > self.config.offline_threshold_secs {
                debug!(node = %node.name, idle_secs, "Node is stale on the dashboard; skipping probe.");
                return Latency::Unreachable(UnreachableReason::Stale { idle_secs });
            }
        }

        let ip = match self.bounded(self.dialer.resolve(host)).await {
            Ok(ip) => ip,
            Err(e) => {
                debug!(node = %node.name, host, error = %e, "Resolution failed.");
                return Latency::Unreachable(UnreachableReason::NoResponse);
            }
        };

        let attempts = join_all(self.config.ports.iter().map(|&port| async move {
            let result = self
                .bounded(self.dialer.tcp_connect(SocketAddr::new(ip, port)))
                .await;
            (port, result)
        }))
        .await;

        let mut fastest_tcp: Option<Duration> = None;
        for (port, result) in attempts {
            match result {
                Ok(elapsed) => {
                    debug!(node = %node.name, port, elapsed_ms = (elapsed.as_millis() as u64), "TCP connect succeeded.");
                    fastest_tcp = Some(fastest_tcp.map_or(elapsed, |best| best.min(elapsed)));
                }
                Err(e) => debug!(node = %node.name, port, error = %e, "TCP connect failed."),
            }
        }
        let Some(fastest_tcp) = fastest_tcp else {
            return Latency::Unreachable(UnreachableReason::NoResponse);
        };

        let tls_addr = SocketAddr::new(ip, self.config.tls_port);
        match self.bounded(self.dialer.tls_handshake(host, tls_addr)).await {
            Ok(elapsed) => Latency::measured(elapsed, ProbeMethod::Tls),
            Err(e) => {
                debug!(node = %node.name, error = %e, "TLS handshake failed; falling back to TCP time.");
                Latency::measured(fastest_tcp, ProbeMethod::Tcp)
            }
        }
    }

    /// Probes every node with at most `concurrency` probes in flight.
    /// Results come back in input order.
    pub async fn probe_fleet(&self, nodes: &[Node], now: i64, concurrency: usize) -> Vec<(Node, Latency)> {
        let results: Vec<(Node, Latency)> = stream::iter(nodes)
            .map(|node| async move { (node.clone(), self.probe(node, now).await) })
            .buffered(concurrency.max(1))
            .collect()
            .await;

        let reachable = results.iter().filter(|(_, l)| l.is_reachable()).count();
        info!(total = results.len(), reachable, "Probing finished.");
        results
    }

    async fn bounded<T>(
        &self,
        attempt: impl Future<Output = Result<T, ProbeError>>,
    ) -> Result<T, ProbeError> {
        tokio::time::timeout(self.config.connect_timeout, attempt)
            .await
            .unwrap_or(Err(ProbeError::Timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::net::IpAddr;
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    /// Scripted dialer that records every call.
    #[derive(Default)]
    struct FakeDialer {
        tcp: HashMap<u16, Duration>,
        tls: Option<Duration>,
        hang_on_tls: bool,
        calls: Mutex<Vec<String>>,
    }

    impl FakeDialer {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Dialer for FakeDialer {
        async fn resolve(&self, host: &str) -> Result<IpAddr, ProbeError> {
            self.calls.lock().unwrap().push(format!("resolve {host}"));
            Ok(IpAddr::from([192, 0, 2, 1]))
        }

        async fn tcp_connect(&self, addr: SocketAddr) -> Result<Duration, ProbeError> {
            self.calls.lock().unwrap().push(format!("tcp {}", addr.port()));
            self.tcp
                .get(&addr.port())
                .copied()
                .ok_or_else(|| ProbeError::Connect(std::io::ErrorKind::ConnectionRefused.into()))
        }

        async fn tls_handshake(&self, server_name: &str, addr: SocketAddr) -> Result<Duration, ProbeError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("tls {server_name}:{}", addr.port()));
            if self.hang_on_tls {
                std::future::pending::<()>().await;
            }
            self.tls.ok_or_else(|| ProbeError::Tls("handshake failure".to_string()))
        }
    }

    const NOW: i64 = 1_700_000_000;

    fn node(name: &str, host: Option<&str>, last_active_at: Option<i64>) -> Node {
        Node {
            name: name.to_string(),
            host: host.map(str::to_string),
            last_active_at,
            reported_online: Some(true),
        }
    }

    fn config() -> ProbeConfig {
        ProbeConfig {
            connect_timeout: Duration::from_millis(200),
            ..ProbeConfig::default()
        }
    }

    #[tokio::test]
    async fn no_host_means_no_network_calls() {
        let probe = LatencyProbe::new(FakeDialer::default(), config());
        let latency = probe.probe(&node("a", None, Some(NOW)), NOW).await;

        assert_eq!(latency, Latency::Unreachable(UnreachableReason::NoAddress));
        assert!(probe.dialer.calls().is_empty());
    }

    #[tokio::test]
    async fn stale_nodes_are_skipped_and_fresh_ones_probed() {
        let dialer = FakeDialer {
            tcp: HashMap::from([(443, Duration::from_millis(30))]),
            tls: Some(Duration::from_millis(45)),
            ..FakeDialer::default()
        };
        let probe = LatencyProbe::new(dialer, config());
        let nodes = vec![
            node("a", Some("a.example.net"), Some(NOW)),
            node("b", Some("b.example.net"), Some(NOW - 700)),
        ];

        let results = probe.probe_fleet(&nodes, NOW, 4).await;

        assert_eq!(results[0].0.name, "a");
        assert_eq!(
            results[0].1,
            Latency::Measured {
                millis: 45,
                via: ProbeMethod::Tls
            }
        );
        assert_eq!(
            results[1].1,
            Latency::Unreachable(UnreachableReason::Stale { idle_secs: 700 })
        );
        let calls = probe.dialer.calls();
        assert!(calls.iter().all(|c| !c.contains("b.example.net")), "{calls:?}");
        assert!(calls.contains(&"resolve a.example.net".to_string()));
        assert!(calls.contains(&"tls a.example.net:443".to_string()));
    }

    #[tokio::test]
    async fn fastest_port_wins_when_tls_fails() {
        let dialer = FakeDialer {
            tcp: HashMap::from([
                (443, Duration::from_millis(120)),
                (80, Duration::from_micros(17_200)),
            ]),
            ..FakeDialer::default()
        };
        let probe = LatencyProbe::new(dialer, config());
        let latency = probe.probe(&node("a", Some("192.0.2.1"), None), NOW).await;

        assert_eq!(
            latency,
            Latency::Measured {
                millis: 18,
                via: ProbeMethod::Tcp
            }
        );
        let calls = probe.dialer.calls();
        for port in [443, 80, 22] {
            assert!(calls.contains(&format!("tcp {port}")));
        }
    }

    #[tokio::test]
    async fn tls_is_skipped_when_nothing_answers() {
        let probe = LatencyProbe::new(FakeDialer::default(), config());
        let latency = probe.probe(&node("a", Some("192.0.2.1"), Some(NOW - 10)), NOW).await;

        assert_eq!(latency, Latency::Unreachable(UnreachableReason::NoResponse));
        assert!(probe.dialer.calls().iter().all(|c| !c.starts_with("tls")));
    }

    #[tokio::test]
    async fn hung_handshake_times_out_and_falls_back() {
        let dialer = FakeDialer {
            tcp: HashMap::from([(22, Duration::from_millis(9))]),
            hang_on_tls: true,
            ..FakeDialer::default()
        };
        let probe = LatencyProbe::new(dialer, config());
        let latency = probe.probe(&node("a", Some("192.0.2.1"), None), NOW).await;

        assert_eq!(
            latency,
            Latency::Measured {
                millis: 9,
                via: ProbeMethod::Tcp
            }
        );
    }

    #[tokio::test]
    async fn loopback_listener_is_reachable_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                drop(stream);
            }
        });

        let probe = LatencyProbe::new(
            NetDialer::new().unwrap(),
            ProbeConfig {
                ports: vec![port],
                tls_port: port,
                connect_timeout: Duration::from_millis(500),
                offline_threshold_secs: 600,
            },
        );
        let latency = probe.probe(&node("local", Some("127.0.0.1"), Some(NOW)), NOW).await;

        match latency {
            Latency::Measured { millis, via } => {
                assert!(millis >= 1);
                assert_eq!(via, ProbeMethod::Tcp);
            }
            other => panic!("expected a TCP measurement, got {other:?}"),
        }
    }

    #[test]
    fn measured_latency_is_never_the_sentinel() {
        assert_eq!(Latency::measured(Duration::from_micros(80), ProbeMethod::Tcp).millis(), 1);
        assert_eq!(Latency::measured(Duration::ZERO, ProbeMethod::Tls).millis(), 1);
        assert_eq!(
            Latency::Unreachable(UnreachableReason::NoResponse).millis(),
            0
        );
    }
}
