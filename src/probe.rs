use async_trait::async_trait;
use log::{debug, warn};
use rand::random;
use std::{net::IpAddr, time::Duration};

use crate::error::Error;

/// Structured result of one liveness probe. `latency_ms` is only known on
/// success, taken from the probe's own round-trip timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub reachable: bool,
    pub latency_ms: Option<u64>,
}

impl ProbeOutcome {
    pub fn unreachable() -> ProbeOutcome {
        ProbeOutcome {
            reachable: false,
            latency_ms: None,
        }
    }
}

/// One reachability check against one host. No retries here; retry and
/// threshold policy live entirely in the debounce logic.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, address: &str) -> ProbeOutcome;
}

/// ICMP echo prober with a bounded per-probe timeout. A probe counts as
/// reachable only when an echo reply actually arrives; timeouts, DNS
/// failures and send errors all fold into an unreachable outcome.
pub struct IcmpProber {
    client: surge_ping::Client,
    timeout: Duration,
}

impl IcmpProber {
    pub fn new(timeout: Duration) -> Result<IcmpProber, Error> {
        let client = surge_ping::Client::new(&surge_ping::Config::default())?;
        Ok(IcmpProber { client, timeout })
    }
}

#[async_trait]
impl Probe for IcmpProber {
    async fn probe(&self, address: &str) -> ProbeOutcome {
        let Some(target_addr) = resolve(address).await else {
            warn!("{address}: DNS resolution failed");
            return ProbeOutcome::unreachable();
        };

        let mut pinger = self
            .client
            .pinger(target_addr, surge_ping::PingIdentifier(random()))
            .await;
        pinger.timeout(self.timeout);

        match pinger.ping(surge_ping::PingSequence(0), &[]).await {
            Ok((_reply, duration)) => {
                let latency_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
                debug!("{address}: echo reply in {latency_ms} ms");
                ProbeOutcome {
                    reachable: true,
                    latency_ms: Some(latency_ms),
                }
            }
            Err(e) => {
                debug!("{address}: probe failed: {e}");
                ProbeOutcome::unreachable()
            }
        }
    }
}

/// Resolves a domain name or IP literal to one IPv4 address. Resolution
/// runs on the blocking pool since `ToSocketAddrs` does synchronous DNS
/// lookups. Only IPv4 results are considered: the ICMP client is an
/// ICMPv4 socket, and a dual-stack name whose first record is IPv6 would
/// otherwise fail every probe and be reported Down while perfectly up.
async fn resolve(address: &str) -> Option<IpAddr> {
    let host = address.to_string();
    let resolved = tokio::task::spawn_blocking(move || {
        use std::net::ToSocketAddrs;
        let host_with_port = format!("{host}:0");
        host_with_port.to_socket_addrs()
    })
    .await;

    match resolved {
        Ok(Ok(mut addrs)) => addrs.find(|addr| addr.is_ipv4()).map(|addr| addr.ip()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_ipv4_literal() {
        let addr = resolve("127.0.0.1").await;
        assert_eq!(addr, Some(IpAddr::from([127, 0, 0, 1])));
    }

    #[tokio::test]
    async fn test_resolve_localhost() {
        let addr = resolve("localhost").await;
        assert!(addr.is_some(), "Expected localhost to resolve");
    }

    // localhost resolves dual-stack on most systems (::1 and 127.0.0.1,
    // often v6 first); the prober must still end up with an IPv4 address.
    #[tokio::test]
    async fn test_resolve_prefers_ipv4_on_dual_stack_names() {
        let addr = resolve("localhost").await.expect("localhost must resolve");
        assert!(addr.is_ipv4(), "Expected an IPv4 address, got {addr}");
    }

    #[tokio::test]
    async fn test_resolve_nonexistent_domain_fails() {
        let addr = resolve("nonexistent.subdomain.rust-lang.org").await;
        assert!(addr.is_none(), "Expected bogus domain to fail resolution");
    }
}
