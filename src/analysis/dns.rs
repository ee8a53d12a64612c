use std::collections::BTreeSet;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use url::{Host, Url};

use crate::model::control::DNS_NAME_ERROR;
use crate::model::{ControlResponse, DnsLookupResult};
use crate::netx::failure::{FAILURE_ANDROID_DNS_CACHE_NO_DATA, FAILURE_DNS_NXDOMAIN_ERROR};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DnsConsistency {
    Consistent,
    Inconsistent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsAnalysisResult {
    /// `None` when the analysis could not run, e.g. without a control.
    pub dns_consistency: Option<DnsConsistency>,
}

/// Compares the probe's DNS answers with the control's.
pub fn dns_analysis(
    url: &Url,
    probe: &DnsLookupResult,
    control: &ControlResponse,
) -> DnsAnalysisResult {
    let consistency = compare(url, probe, control);
    DnsAnalysisResult {
        dns_consistency: Some(consistency),
    }
}

fn compare(url: &Url, probe: &DnsLookupResult, control: &ControlResponse) -> DnsConsistency {
    if matches!(url.host(), Some(Host::Ipv4(_) | Host::Ipv6(_))) {
        // nothing the control could contradict
        return DnsConsistency::Consistent;
    }

    if let (Some(ours), Some(theirs)) = (&probe.failure, &control.dns.failure) {
        let nxdomain =
            ours == FAILURE_DNS_NXDOMAIN_ERROR || ours == FAILURE_ANDROID_DNS_CACHE_NO_DATA;
        if nxdomain && theirs == DNS_NAME_ERROR {
            return DnsConsistency::Consistent;
        }
        return DnsConsistency::Inconsistent;
    }

    let known = |asn: &u32| *asn != 0;
    let probe_asns: BTreeSet<u32> = probe.addrs.values().copied().filter(known).collect();
    let control_asns: BTreeSet<u32> = control.dns.asns.iter().copied().filter(known).collect();
    if !probe_asns.is_disjoint(&control_asns) {
        return DnsConsistency::Consistent;
    }

    let control_ips: BTreeSet<IpAddr> = control
        .dns
        .addrs
        .iter()
        .filter_map(|addr| addr.parse().ok())
        .collect();
    if probe.addrs.keys().any(|ip| control_ips.contains(ip)) {
        return DnsConsistency::Consistent;
    }

    DnsConsistency::Inconsistent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ControlDnsResult;

    fn probe(addrs: &[(&str, u32)], failure: Option<&str>) -> DnsLookupResult {
        DnsLookupResult {
            addrs: addrs
                .iter()
                .map(|(ip, asn)| (ip.parse().unwrap(), *asn))
                .collect(),
            failure: failure.map(str::to_string),
        }
    }

    fn control(addrs: &[(&str, u32)], failure: Option<&str>) -> ControlResponse {
        ControlResponse {
            dns: ControlDnsResult {
                failure: failure.map(str::to_string),
                addrs: addrs.iter().map(|(ip, _)| ip.to_string()).collect(),
                asns: addrs.iter().map(|(_, asn)| *asn).collect(),
            },
            ..Default::default()
        }
    }

    fn consistency(
        url: &str,
        probe: &DnsLookupResult,
        control: &ControlResponse,
    ) -> DnsConsistency {
        let url = Url::parse(url).unwrap();
        dns_analysis(&url, probe, control).dns_consistency.unwrap()
    }

    #[test]
    fn literal_ip_target_should_always_be_consistent() {
        let result = consistency(
            "https://10.0.0.1/",
            &probe(&[], Some("generic_timeout_error")),
            &control(&[("8.8.8.8", 15169)], Some("unknown_error")),
        );
        assert_eq!(result, DnsConsistency::Consistent);

        let result = consistency("http://[::1]:8080/", &probe(&[], None), &control(&[], None));
        assert_eq!(result, DnsConsistency::Consistent);
    }

    #[test]
    fn nxdomain_on_both_sides_should_be_consistent() {
        let ctrl = control(&[], Some(DNS_NAME_ERROR));
        for failure in [FAILURE_DNS_NXDOMAIN_ERROR, FAILURE_ANDROID_DNS_CACHE_NO_DATA] {
            let result = consistency("http://gone.example/", &probe(&[], Some(failure)), &ctrl);
            assert_eq!(result, DnsConsistency::Consistent, "{failure}");
        }
    }

    #[test]
    fn other_double_failures_should_be_inconsistent() {
        let result = consistency(
            "http://example.com/",
            &probe(&[], Some("generic_timeout_error")),
            &control(&[], Some(DNS_NAME_ERROR)),
        );
        assert_eq!(result, DnsConsistency::Inconsistent);

        let result = consistency(
            "http://example.com/",
            &probe(&[], Some(FAILURE_DNS_NXDOMAIN_ERROR)),
            &control(&[], Some("dns_server_failure")),
        );
        assert_eq!(result, DnsConsistency::Inconsistent);
    }

    #[test]
    fn shared_asn_should_be_consistent() {
        let result = consistency(
            "http://example.com/",
            &probe(&[("104.16.1.1", 13335)], None),
            &control(&[("104.16.2.2", 13335), ("8.8.8.8", 15169)], None),
        );
        assert_eq!(result, DnsConsistency::Consistent);
    }

    #[test]
    fn unknown_asn_should_not_count_as_shared() {
        let result = consistency(
            "http://example.com/",
            &probe(&[("10.10.34.35", 0)], None),
            &control(&[("93.184.216.34", 0)], None),
        );
        assert_eq!(result, DnsConsistency::Inconsistent);
    }

    #[test]
    fn should_fall_back_to_address_intersection() {
        let result = consistency(
            "http://example.com/",
            &probe(&[("93.184.216.34", 0), ("10.0.0.1", 0)], None),
            &control(&[("93.184.216.34", 0)], None),
        );
        assert_eq!(result, DnsConsistency::Consistent);
    }

    #[test]
    fn probe_only_failure_should_be_inconsistent() {
        let result = consistency(
            "http://example.com/",
            &probe(&[], Some(FAILURE_DNS_NXDOMAIN_ERROR)),
            &control(&[("93.184.216.34", 15133)], None),
        );
        assert_eq!(result, DnsConsistency::Inconsistent);
    }

    #[test]
    fn relabeling_addresses_should_not_change_the_verdict() {
        let ctrl = control(&[("1.1.1.1", 13335), ("5.5.5.5", 0)], None);
        let a = consistency("http://example.com/", &probe(&[("1.0.0.1", 13335)], None), &ctrl);
        let b = consistency("http://example.com/", &probe(&[("104.16.0.9", 13335)], None), &ctrl);
        assert_eq!(a, b);

        let other = control(&[("9.9.9.9", 19281)], None);
        let a = consistency("http://example.com/", &probe(&[("1.0.0.1", 13335)], None), &other);
        let b = consistency("http://example.com/", &probe(&[("104.16.0.9", 13335)], None), &other);
        assert_eq!(a, b);
        assert_eq!(a, DnsConsistency::Inconsistent);
    }
}
