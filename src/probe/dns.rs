use std::collections::BTreeMap;
use std::net::IpAddr;

use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};
use url::{Host, Url};

use crate::model::DnsLookupResult;
use crate::model::testkeys::{DnsAnswer, DnsQueryEntry};
use crate::netx::bogon::is_bogon;
use crate::netx::{Failure, Netx, Operation};

/// What the DNS stage hands to the rest of the run.
#[derive(Debug, Clone, Default)]
pub struct DnsOutcome {
    pub result: DnsLookupResult,
    pub queries: Vec<DnsQueryEntry>,
    /// Whether any resolved address is a bogon.
    pub bogon: bool,
}

/// Resolves the URL host, unless it already is an address.
pub async fn lookup(
    netx: &Netx,
    url: &Url,
    resolver_address: &str,
    deadline: Instant,
) -> DnsOutcome {
    let hostname = match url.host() {
        Some(Host::Ipv4(ip)) => return literal(netx, IpAddr::V4(ip)),
        Some(Host::Ipv6(ip)) => return literal(netx, IpAddr::V6(ip)),
        Some(Host::Domain(domain)) => domain.to_string(),
        None => String::new(),
    };

    let answer = match timeout_at(deadline, netx.resolver.lookup_host(&hostname)).await {
        Ok(answer) => answer,
        Err(_) => Err(Failure::timeout(Operation::Resolve)),
    };

    let mut outcome = DnsOutcome::default();
    let mut query = DnsQueryEntry {
        hostname: hostname.clone(),
        query_type: "ANY".to_string(),
        engine: "system".to_string(),
        resolver_address: resolver_address.to_string(),
        ..Default::default()
    };

    match answer {
        Ok(addrs) => {
            for ip in addrs {
                let asn = netx.asn_lookup.lookup_asn(ip);
                let number = asn.as_ref().map_or(0, |asn| asn.number);
                if is_bogon(ip) {
                    warn!(%hostname, %ip, "DNS answer contains a bogon");
                    outcome.bogon = true;
                }
                query.answers.push(DnsAnswer {
                    answer_type: if ip.is_ipv4() { "A" } else { "AAAA" }.to_string(),
                    ipv4: ip.is_ipv4().then(|| ip.to_string()),
                    ipv6: ip.is_ipv6().then(|| ip.to_string()),
                    asn: number,
                    as_org_name: asn.map(|asn| asn.org).unwrap_or_default(),
                });
                outcome.result.addrs.insert(ip, number);
            }
            info!(%hostname, addrs = outcome.result.addrs.len(), "DNS lookup done");
        }
        Err(failure) => {
            info!(%hostname, %failure, "DNS lookup failed");
            query.failure = Some(failure.as_str().to_string());
            outcome.result.failure = Some(failure.into_string());
        }
    }

    outcome.queries.push(query);
    outcome
}

fn literal(netx: &Netx, ip: IpAddr) -> DnsOutcome {
    debug!(%ip, "target is an address, skipping DNS lookup");
    let asn = netx.asn_lookup.lookup_asn(ip).map_or(0, |asn| asn.number);
    DnsOutcome {
        result: DnsLookupResult {
            addrs: BTreeMap::from([(ip, asn)]),
            failure: None,
        },
        queries: Vec::new(),
        bogon: is_bogon(ip),
    }
}
