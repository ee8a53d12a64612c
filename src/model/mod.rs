//! Data exchanged between the measurement stages.

pub mod control;
pub mod measurement;
pub mod testkeys;

use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use url::Url;

pub use control::{
    ControlDnsResult, ControlHttpRequestResult, ControlRequest, ControlResponse,
    ControlTcpConnectResult,
};
pub use measurement::{Measurement, SummaryKeys};
pub use testkeys::{TestKeys, join_host_port};

/// Outcome of the probe DNS stage: every resolved address with its ASN.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsLookupResult {
    pub addrs: BTreeMap<IpAddr, u32>,
    pub failure: Option<String>,
}

impl DnsLookupResult {
    pub fn ips(&self) -> Vec<IpAddr> {
        self.addrs.keys().copied().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EndpointProtocol {
    /// Plain TCP connect, for `http://` targets.
    Tcp,
    /// TCP connect followed by a TLS handshake, for `https://` targets.
    Tls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    pub addr: SocketAddr,
    pub protocol: EndpointProtocol,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // SocketAddr already brackets IPv6 hosts
        write!(f, "{}", self.addr)
    }
}

/// Derives one endpoint per resolved address from the URL scheme and port.
///
/// Returns an empty list for schemes other than `http` and `https`.
pub fn endpoints_for(url: &Url, dns: &DnsLookupResult) -> Vec<Endpoint> {
    let (protocol, default_port) = match url.scheme() {
        "http" => (EndpointProtocol::Tcp, 80),
        "https" => (EndpointProtocol::Tls, 443),
        _ => return Vec::new(),
    };
    let port = url.port().unwrap_or(default_port);
    dns.addrs
        .keys()
        .map(|ip| Endpoint {
            addr: SocketAddr::new(*ip, port),
            protocol,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(addrs: &[(&str, u32)]) -> DnsLookupResult {
        DnsLookupResult {
            addrs: addrs
                .iter()
                .map(|(ip, asn)| (ip.parse().unwrap(), *asn))
                .collect(),
            failure: None,
        }
    }

    #[test]
    fn http_should_connect_on_port_80() {
        let url = Url::parse("http://example.com/").unwrap();
        let endpoints = endpoints_for(&url, &lookup(&[("93.184.216.34", 15133)]));

        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].to_string(), "93.184.216.34:80");
        assert_eq!(endpoints[0].protocol, EndpointProtocol::Tcp);
    }

    #[test]
    fn https_should_handshake_on_explicit_port() {
        let url = Url::parse("https://example.com:8443/x").unwrap();
        let endpoints = endpoints_for(&url, &lookup(&[("2606:2800:220:1::1", 0), ("1.2.3.4", 0)]));

        let rendered: Vec<String> = endpoints.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["1.2.3.4:8443", "[2606:2800:220:1::1]:8443"]);
        assert!(endpoints.iter().all(|e| e.protocol == EndpointProtocol::Tls));
    }

    #[test]
    fn other_schemes_should_have_no_endpoints() {
        let url = Url::parse("ftp://example.com/").unwrap();
        assert!(endpoints_for(&url, &lookup(&[("1.2.3.4", 0)])).is_empty());
    }
}
