//! Wire format shared by the probe and the control test helper.
//!
//! Both processes evolve independently, so every field tolerates being
//! absent on decode. Numeric fields use `-1` for "unknown" instead of an
//! optional value: downstream consumers depend on that convention.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Failure the helper reports for NXDOMAIN.
pub const DNS_NAME_ERROR: &str = "dns_name_error";
/// Failure the helper reports for SERVFAIL, REFUSED and friends.
pub const DNS_SERVER_FAILURE: &str = "dns_server_failure";
/// Failure the helper reports for any DNS-originated HTTP failure.
pub const DNS_LOOKUP_ERROR: &str = "dns_lookup_error";
pub const CONNECTION_REFUSED_ERROR: &str = "connection_refused_error";
pub const CONNECT_ERROR: &str = "connect_error";
pub const UNKNOWN_ERROR: &str = "unknown_error";

/// What the probe asks the helper to measure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRequest {
    pub http_request: String,
    #[serde(default)]
    pub http_request_headers: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub tcp_connect: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlDnsResult {
    #[serde(default)]
    pub failure: Option<String>,
    #[serde(default)]
    pub addrs: Vec<String>,
    /// ASN of each entry in `addrs`, filled in by the probe. Index aligned
    /// with `addrs`; 0 when the lookup failed.
    #[serde(skip)]
    pub asns: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlTcpConnectResult {
    #[serde(default)]
    pub status: bool,
    #[serde(default)]
    pub failure: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlHttpRequestResult {
    pub body_length: i64,
    pub failure: Option<String>,
    pub title: String,
    pub headers: BTreeMap<String, String>,
    pub status_code: i64,
}

impl Default for ControlHttpRequestResult {
    fn default() -> Self {
        Self {
            body_length: -1,
            failure: None,
            title: String::new(),
            headers: BTreeMap::new(),
            status_code: -1,
        }
    }
}

impl ControlHttpRequestResult {
    /// Result for an HTTP check that failed before a response was available.
    pub fn failed(failure: impl Into<String>) -> Self {
        Self {
            failure: Some(failure.into()),
            ..Self::default()
        }
    }
}

/// What the helper observed from its own vantage point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlResponse {
    pub tcp_connect: BTreeMap<String, ControlTcpConnectResult>,
    pub http_request: ControlHttpRequestResult,
    pub dns: ControlDnsResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_decode_legacy_response() {
        let json = r#"{
            "tcp_connect": {
                "93.184.216.34:443": {"status": true, "failure": null}
            },
            "http_request": {
                "body_length": 1256,
                "failure": null,
                "title": "Example Domain",
                "headers": {"Content-Type": "text/html"},
                "status_code": 200
            },
            "dns": {"failure": null, "addrs": ["93.184.216.34"]}
        }"#;

        let response: ControlResponse = serde_json::from_str(json).unwrap();

        assert!(response.tcp_connect["93.184.216.34:443"].status);
        assert_eq!(response.http_request.status_code, 200);
        assert_eq!(response.http_request.title, "Example Domain");
        assert_eq!(response.dns.addrs, vec!["93.184.216.34".to_string()]);
        assert!(response.dns.asns.is_empty());
    }

    #[test]
    fn missing_http_fields_should_use_sentinels() {
        let response: ControlResponse =
            serde_json::from_str(r#"{"http_request": {"failure": "unknown_error"}}"#).unwrap();

        assert_eq!(response.http_request.body_length, -1);
        assert_eq!(response.http_request.status_code, -1);
        assert_eq!(response.http_request.failure.as_deref(), Some(UNKNOWN_ERROR));
    }

    #[test]
    fn failed_http_result_should_encode_sentinels() {
        let result = ControlHttpRequestResult::failed(DNS_LOOKUP_ERROR);
        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(value["body_length"], -1);
        assert_eq!(value["status_code"], -1);
        assert_eq!(value["failure"], "dns_lookup_error");
        assert_eq!(value["title"], "");
    }

    #[test]
    fn asns_should_not_be_sent_on_the_wire() {
        let dns = ControlDnsResult {
            failure: None,
            addrs: vec!["1.1.1.1".to_string()],
            asns: vec![13335],
        };
        let value = serde_json::to_value(&dns).unwrap();
        assert!(value.get("asns").is_none());
    }
}
