//! Bogon address detection.
//!
//! A bogon is an address that is not globally routable and therefore should
//! never appear in a legitimate public DNS answer.

use std::net::IpAddr;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use ipnetwork::IpNetwork;
use tracing::warn;

use super::Resolver;
use super::failure::{FAILURE_DNS_BOGON_ERROR, Failure, Operation};

/// Special-purpose networks never announced on the public internet.
static BOGON_NETWORKS: LazyLock<Vec<IpNetwork>> = LazyLock::new(|| {
    [
        "0.0.0.0/8",
        "10.0.0.0/8",
        // carrier-grade NAT
        "100.64.0.0/10",
        "127.0.0.0/8",
        "169.254.0.0/16",
        "172.16.0.0/12",
        // IETF protocol assignments
        "192.0.0.0/24",
        "192.0.2.0/24",
        "192.168.0.0/16",
        // benchmarking
        "198.18.0.0/15",
        "198.51.100.0/24",
        "203.0.113.0/24",
        "224.0.0.0/4",
        "240.0.0.0/4",
        "::/128",
        "::1/128",
        // discard only
        "100::/64",
        "2001:10::/28",
        "2001:db8::/32",
        "fc00::/7",
        "fe80::/10",
        "ff00::/8",
    ]
    .iter()
    .map(|network| network.parse().expect("valid bogon network"))
    .collect()
});

/// Returns whether the given address is a bogon.
pub fn is_bogon(ip: IpAddr) -> bool {
    let ip = match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(ip, IpAddr::V4),
        IpAddr::V4(_) => ip,
    };
    BOGON_NETWORKS.iter().any(|network| network.contains(ip))
}

/// Resolver decorator failing lookups whose answer contains any bogon.
#[derive(Clone)]
pub struct BogonResolver {
    inner: Arc<dyn Resolver>,
}

impl BogonResolver {
    pub fn new(inner: Arc<dyn Resolver>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Resolver for BogonResolver {
    async fn lookup_host(&self, host: &str) -> Result<Vec<IpAddr>, Failure> {
        let addrs = self.inner.lookup_host(host).await?;
        if let Some(bogon) = addrs.iter().find(|ip| is_bogon(**ip)) {
            warn!(%host, %bogon, "resolver returned a bogon");
            return Err(Failure::new(FAILURE_DNS_BOGON_ERROR, Operation::Resolve));
        }
        Ok(addrs)
    }
}
