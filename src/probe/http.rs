use std::net::IpAddr;

use tokio::time::{Instant, timeout_at};
use tracing::{debug, info};
use url::Url;

use crate::model::testkeys::{
    HTTP_EXPERIMENT_TAG, HttpRequestRecord, HttpResponseRecord, RequestEntry,
};
use crate::netx::{Failure, HttpRequest, HttpResponse, Netx, Operation};

/// Hops followed before giving up.
pub const MAX_REDIRECTS: usize = 20;

#[derive(Debug, Clone, Default)]
pub struct HttpOutcome {
    /// One entry per hop, most recent first.
    pub requests: Vec<RequestEntry>,
    pub failure: Option<String>,
}

/// Fetches `url`, following redirects by hand so every hop gets recorded.
///
/// `addrs` are used for the target host instead of resolving it again;
/// hosts reached through redirects are resolved normally.
pub async fn get(
    netx: &Netx,
    url: &Url,
    addrs: &[IpAddr],
    headers: &[(String, String)],
    max_body: usize,
    deadline: Instant,
) -> HttpOutcome {
    let mut outcome = HttpOutcome::default();
    let mut current = url.clone();

    loop {
        let pinned_addrs = if current.host() == url.host() {
            addrs.to_vec()
        } else {
            Vec::new()
        };
        let request = HttpRequest {
            url: current.clone(),
            headers: headers.to_vec(),
            pinned_addrs,
            max_body,
        };
        let result = match timeout_at(deadline, netx.http_client.get(&request)).await {
            Ok(result) => result,
            Err(_) => Err(Failure::timeout(Operation::HttpRoundTrip)),
        };

        let mut entry = RequestEntry {
            request: HttpRequestRecord {
                method: "GET".to_string(),
                url: current.to_string(),
                headers: headers.iter().cloned().collect(),
            },
            tags: vec![HTTP_EXPERIMENT_TAG.to_string()],
            ..Default::default()
        };

        let response = match result {
            Ok(response) => response,
            Err(failure) => {
                info!(url = %current, %failure, "HTTP request failed");
                entry.failure = Some(failure.as_str().to_string());
                outcome.failure = Some(failure.into_string());
                outcome.requests.push(entry);
                break;
            }
        };

        let next = redirect_target(&current, &response);
        entry.response = record(response);
        outcome.requests.push(entry);

        let Some(next) = next else {
            break;
        };
        if outcome.requests.len() > MAX_REDIRECTS {
            outcome.failure = Some(format!(
                "unknown_failure: stopped after {MAX_REDIRECTS} redirects"
            ));
            break;
        }
        debug!(from = %current, to = %next, "following redirect");
        current = next;
    }

    outcome.requests.reverse();
    outcome
}

fn redirect_target(current: &Url, response: &HttpResponse) -> Option<Url> {
    if !matches!(response.status_code, 301 | 302 | 303 | 307 | 308) {
        return None;
    }
    let location = response.headers.get("location")?;
    let next = current.join(location).ok()?;
    matches!(next.scheme(), "http" | "https").then_some(next)
}

fn record(response: HttpResponse) -> HttpResponseRecord {
    HttpResponseRecord {
        code: i64::from(response.status_code),
        headers: response.headers,
        body_length: response.body.len() as i64,
        body: String::from_utf8_lossy(&response.body).into_owned(),
        body_is_truncated: response.body_is_truncated,
    }
}
