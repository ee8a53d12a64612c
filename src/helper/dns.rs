use std::time::Duration;

use tokio::time::timeout;
use tracing::debug;

use crate::model::ControlDnsResult;
use crate::model::control::{DNS_NAME_ERROR, DNS_SERVER_FAILURE, UNKNOWN_ERROR};
use crate::netx::Resolver;
use crate::netx::failure::{
    FAILURE_DNS_NO_ANSWER, FAILURE_DNS_NON_RECOVERABLE_FAILURE, FAILURE_DNS_NXDOMAIN_ERROR,
    FAILURE_DNS_REFUSED_ERROR, FAILURE_DNS_SERVER_MISBEHAVING, FAILURE_DNS_TEMPORARY_FAILURE,
    FAILURE_GENERIC_TIMEOUT_ERROR,
};

/// Resolves `hostname` and reports the answer in wire format.
pub async fn dns_check(
    resolver: &dyn Resolver,
    hostname: &str,
    limit: Duration,
) -> ControlDnsResult {
    let answer = match timeout(limit, resolver.lookup_host(hostname)).await {
        Ok(answer) => answer.map_err(|failure| failure.into_string()),
        Err(_) => Err(FAILURE_GENERIC_TIMEOUT_ERROR.to_string()),
    };
    match answer {
        Ok(addrs) => ControlDnsResult {
            failure: None,
            addrs: addrs.iter().map(ToString::to_string).collect(),
            asns: Vec::new(),
        },
        Err(failure) => {
            debug!(%hostname, %failure, "DNS check failed");
            ControlDnsResult {
                failure: map_dns_failure(&failure),
                ..Default::default()
            }
        }
    }
}

/// Translates a failure into the vocabulary of the legacy helper.
///
/// An empty answer is not a failure there.
pub fn map_dns_failure(failure: &str) -> Option<String> {
    let mapped = match failure {
        FAILURE_DNS_NXDOMAIN_ERROR => DNS_NAME_ERROR,
        FAILURE_DNS_NO_ANSWER => return None,
        FAILURE_DNS_NON_RECOVERABLE_FAILURE
        | FAILURE_DNS_REFUSED_ERROR
        | FAILURE_DNS_SERVER_MISBEHAVING
        | FAILURE_DNS_TEMPORARY_FAILURE => DNS_SERVER_FAILURE,
        _ => UNKNOWN_ERROR,
    };
    Some(mapped.to_string())
}
