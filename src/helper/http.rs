use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::timeout;
use tracing::debug;
use url::Url;

use crate::analysis::extract_title;
use crate::model::ControlHttpRequestResult;
use crate::model::control::{CONNECTION_REFUSED_ERROR, DNS_LOOKUP_ERROR, UNKNOWN_ERROR};
use crate::netx::failure::{
    FAILURE_CONNECTION_REFUSED, FAILURE_DNS_BOGON_ERROR, FAILURE_DNS_NO_ANSWER,
    FAILURE_DNS_NON_RECOVERABLE_FAILURE, FAILURE_DNS_NXDOMAIN_ERROR, FAILURE_DNS_REFUSED_ERROR,
    FAILURE_DNS_SERVER_MISBEHAVING, FAILURE_DNS_TEMPORARY_FAILURE, FAILURE_GENERIC_TIMEOUT_ERROR,
};
use crate::netx::{Failure, HttpClient, HttpRequest, Operation};

/// Request headers the helper passes on to the target.
const FORWARDED_HEADERS: &[&str] = &["accept", "accept-language", "user-agent"];

/// Fetches `url` and reports status, headers, body length and title.
pub async fn http_check(
    client: &dyn HttpClient,
    url: &Url,
    headers: &BTreeMap<String, Vec<String>>,
    max_body: usize,
    limit: Duration,
) -> ControlHttpRequestResult {
    let request = HttpRequest {
        url: url.clone(),
        headers: forwarded_headers(headers),
        pinned_addrs: Vec::new(),
        max_body,
    };
    let result = match timeout(limit, client.get(&request)).await {
        Ok(result) => result,
        Err(_) => Err(Failure::timeout(Operation::HttpRoundTrip)),
    };
    match result {
        Ok(response) => {
            let body = String::from_utf8_lossy(&response.body);
            ControlHttpRequestResult {
                body_length: response.body.len() as i64,
                failure: None,
                title: extract_title(&body).unwrap_or_default(),
                headers: response.headers,
                status_code: i64::from(response.status_code),
            }
        }
        Err(failure) => {
            debug!(%url, %failure, "HTTP check failed");
            ControlHttpRequestResult::failed(map_http_failure(&failure))
        }
    }
}

fn forwarded_headers(headers: &BTreeMap<String, Vec<String>>) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| FORWARDED_HEADERS.contains(&name.to_ascii_lowercase().as_str()))
        .flat_map(|(name, values)| values.iter().map(move |value| (name.clone(), value.clone())))
        .collect()
}

/// Translates a failure into the vocabulary of the legacy helper.
pub fn map_http_failure(failure: &Failure) -> String {
    match failure.as_str() {
        FAILURE_DNS_NXDOMAIN_ERROR
        | FAILURE_DNS_NO_ANSWER
        | FAILURE_DNS_NON_RECOVERABLE_FAILURE
        | FAILURE_DNS_REFUSED_ERROR
        | FAILURE_DNS_SERVER_MISBEHAVING
        | FAILURE_DNS_TEMPORARY_FAILURE
        | FAILURE_DNS_BOGON_ERROR => DNS_LOOKUP_ERROR,
        FAILURE_GENERIC_TIMEOUT_ERROR if failure.operation() == Operation::Resolve => {
            DNS_LOOKUP_ERROR
        }
        FAILURE_GENERIC_TIMEOUT_ERROR => FAILURE_GENERIC_TIMEOUT_ERROR,
        FAILURE_CONNECTION_REFUSED => CONNECTION_REFUSED_ERROR,
        _ => UNKNOWN_ERROR,
    }
    .to_string()
}
