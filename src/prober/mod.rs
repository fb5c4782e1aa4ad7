// src/prober/mod.rs
//
// On-demand TCP connectivity probe for backend targets. Level-triggered:
// a target record created in or moved to the "pending" state gets probed
// once; there is no continuous polling loop.

use crate::metrics::MetricsCollector;
use crate::pocketbase::{BackendTarget, PocketBaseClient, SERVERS_COLLECTION};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const DEFAULT_MINECRAFT_PORT: u16 = 25565;

/// Split `host:port`, defaulting the port when unparseable.
fn parse_address(address: &str) -> (String, u16) {
    match address.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().unwrap_or(DEFAULT_MINECRAFT_PORT);
            (host.to_string(), port)
        }
        None => (address.to_string(), DEFAULT_MINECRAFT_PORT),
    }
}

/// Raw TCP connect. Success yields the round-trip time in ms; any failure
/// (timeout, refused, DNS) is simply "offline".
pub async fn probe(address: &str, connect_timeout: Duration) -> (bool, u64) {
    let (host, port) = parse_address(address);
    let start = Instant::now();

    match timeout(connect_timeout, TcpStream::connect((host.as_str(), port))).await {
        Ok(Ok(_stream)) => (true, start.elapsed().as_millis() as u64),
        Ok(Err(e)) => {
            debug!("Probe of {address} failed: {e}");
            (false, 0)
        }
        Err(_) => {
            debug!("Probe of {address} timed out");
            (false, 0)
        }
    }
}

pub struct Prober {
    client: Arc<PocketBaseClient>,
    metrics: Arc<MetricsCollector>,
    connect_timeout: Duration,
    in_flight: DashMap<String, ()>,
}

impl Prober {
    pub fn new(
        client: Arc<PocketBaseClient>,
        metrics: Arc<MetricsCollector>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            client,
            metrics,
            connect_timeout,
            in_flight: DashMap::new(),
        }
    }

    /// Probe one target and record the result on its record. Duplicate
    /// triggers for a target already being probed are dropped.
    pub async fn probe_target(&self, target: &BackendTarget) {
        if self.in_flight.insert(target.id.clone(), ()).is_some() {
            debug!("Probe of {} already in flight", target.name);
            return;
        }

        let (online, latency_ms) = probe(&target.address, self.connect_timeout).await;
        let status = if online { "online" } else { "offline" };

        info!(
            "Probed {} ({}): {} ({}ms)",
            target.name, target.address, status, latency_ms
        );
        self.metrics.record_probe(status);

        let body = serde_json::json!({
            "status": status,
            "latency_ms": latency_ms,
            "last_checked": Utc::now().to_rfc3339(),
        });
        if let Err(e) = self
            .client
            .update_record(SERVERS_COLLECTION, &target.id, &body)
            .await
        {
            warn!("Failed to record probe result for {}: {e:#}", target.name);
        }

        self.in_flight.remove(&target.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address_with_port() {
        assert_eq!(parse_address("mc.example.com:25566"), ("mc.example.com".to_string(), 25566));
    }

    #[test]
    fn test_parse_address_defaults_port() {
        assert_eq!(parse_address("mc.example.com"), ("mc.example.com".to_string(), 25565));
        assert_eq!(parse_address("mc.example.com:notaport"), ("mc.example.com".to_string(), 25565));
    }

    #[tokio::test]
    async fn test_probe_reaches_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (online, _latency) =
            probe(&format!("127.0.0.1:{}", addr.port()), Duration::from_secs(2)).await;
        assert!(online);
    }

    #[tokio::test]
    async fn test_probe_refused_is_offline_with_zero_latency() {
        // Bind then drop to get a port that refuses connections.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (online, latency) = probe(&format!("127.0.0.1:{port}"), Duration::from_secs(2)).await;
        assert!(!online);
        assert_eq!(latency, 0);
    }
}
