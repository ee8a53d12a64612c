use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::LazyLock;

use futures::future::join_all;
use regex::Regex;
use tracing::info;
use url::{Host, Url};

use super::Helper;
use super::dns::dns_check;
use super::http::http_check;
use super::tcp::tcp_check;
use crate::error::RequestError;
use crate::model::{ControlDnsResult, ControlRequest, ControlResponse};

/// Host names and dotted IPv4 addresses, optional port, path and query.
static ACCEPTABLE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)^https?://",
        r"(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)*",
        r"[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.?",
        r"(?::[0-9]{1,5})?(?:[/?#].*)?$",
    ))
    .expect("valid URL regex")
});

/// Parses the URL the probe asked about, refusing anything outside the
/// allow-list.
pub fn acceptable_url(raw: &str) -> Result<Url, RequestError> {
    if !ACCEPTABLE_URL.is_match(raw) {
        return Err(RequestError::InvalidUrl(raw.to_string()));
    }
    Url::parse(raw).map_err(|_| RequestError::InvalidUrl(raw.to_string()))
}

impl Helper {
    /// Runs the DNS, TCP and HTTP checks for `request` concurrently and
    /// waits for all of them.
    pub async fn measure(&self, request: &ControlRequest) -> Result<ControlResponse, RequestError> {
        let url = acceptable_url(&request.http_request)?;
        let limit = self.settings.stage_timeout;
        let netx = &self.netx;

        let dns = async {
            match url.host() {
                Some(Host::Domain(domain)) => {
                    dns_check(netx.resolver.as_ref(), domain, limit).await
                }
                Some(Host::Ipv4(ip)) => literal(IpAddr::V4(ip)),
                Some(Host::Ipv6(ip)) => literal(IpAddr::V6(ip)),
                None => ControlDnsResult::default(),
            }
        };
        let tcp = join_all(request.tcp_connect.iter().map(|endpoint| async move {
            (endpoint.clone(), tcp_check(netx.dialer.as_ref(), endpoint, limit).await)
        }));
        let http = http_check(
            netx.http_client.as_ref(),
            &url,
            &request.http_request_headers,
            self.settings.max_body_size,
            limit,
        );

        let (dns, tcp, http) = tokio::join!(dns, tcp, http);
        let tcp_connect: BTreeMap<_, _> = tcp.into_iter().collect();
        info!(
            url = %url,
            dns_failure = ?dns.failure,
            endpoints = tcp_connect.len(),
            http_failure = ?http.failure,
            "measured"
        );

        Ok(ControlResponse {
            tcp_connect,
            http_request: http,
            dns,
        })
    }
}

fn literal(ip: IpAddr) -> ControlDnsResult {
    ControlDnsResult {
        failure: None,
        addrs: vec![ip.to_string()],
        asns: Vec::new(),
    }
}
