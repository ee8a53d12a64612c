use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::control::{ControlRequest, ControlResponse};
use crate::analysis::{DnsAnalysisResult, HttpAnalysisResult, Summary};
use crate::netx::TlsState;

/// Tag for entries collected by the TCP/TLS connect stage.
pub const TCP_TLS_EXPERIMENT_TAG: &str = "tcptls_experiment";
/// Tag for entries collected by the HTTP stage.
pub const HTTP_EXPERIMENT_TAG: &str = "http_experiment";

/// `x_dns_flags` bit: the probe resolved at least one bogon.
pub const DNS_FLAG_BOGON: i64 = 1 << 0;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsAnswer {
    pub answer_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<String>,
    pub asn: u32,
    pub as_org_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsQueryEntry {
    pub hostname: String,
    pub query_type: String,
    pub engine: String,
    pub resolver_address: String,
    pub failure: Option<String>,
    pub answers: Vec<DnsAnswer>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpConnectStatus {
    pub success: bool,
    pub failure: Option<String>,
    /// Set by the TCP analysis when the control could reach the endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpConnectEntry {
    pub ip: String,
    pub port: u16,
    pub status: TcpConnectStatus,
}

impl TcpConnectEntry {
    /// The `ip:port` key used by the control response.
    pub fn endpoint(&self) -> String {
        join_host_port(&self.ip, self.port)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsHandshakeEntry {
    pub address: String,
    pub server_name: String,
    pub failure: Option<String>,
    #[serde(flatten)]
    pub state: TlsState,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequestRecord {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponseRecord {
    /// Status code, or 0 when no response was received.
    pub code: i64,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    /// Length in bytes of the body snapshot.
    pub body_length: i64,
    pub body_is_truncated: bool,
}

impl Default for HttpResponseRecord {
    fn default() -> Self {
        Self {
            code: 0,
            headers: BTreeMap::new(),
            body: String::new(),
            body_length: 0,
            body_is_truncated: false,
        }
    }
}

/// One hop of the HTTP redirect chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEntry {
    pub failure: Option<String>,
    pub request: HttpRequestRecord,
    pub response: HttpResponseRecord,
    pub tags: Vec<String>,
}

/// Everything a run measured and concluded.
///
/// Stages fill this in one after the other; once the summary is computed the
/// record is final and gets submitted as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestKeys {
    pub agent: String,
    pub client_resolver: Option<String>,
    pub retries: Option<i64>,
    pub socksproxy: Option<String>,

    // DNS stage
    pub queries: Vec<DnsQueryEntry>,
    pub dns_experiment_failure: Option<String>,
    #[serde(flatten)]
    pub dns_analysis: DnsAnalysisResult,
    pub x_dns_flags: i64,

    // control exchange
    pub control_failure: Option<String>,
    #[serde(skip)]
    pub control_request: ControlRequest,
    pub control: ControlResponse,

    // TCP/TLS stage
    pub tcp_connect: Vec<TcpConnectEntry>,
    pub tls_handshakes: Vec<TlsHandshakeEntry>,
    #[serde(skip)]
    pub tcp_connect_attempts: usize,
    #[serde(skip)]
    pub tcp_connect_successes: usize,

    // HTTP stage; most recent hop first
    pub requests: Vec<RequestEntry>,
    pub http_experiment_failure: Option<String>,
    #[serde(flatten)]
    pub http_analysis: HttpAnalysisResult,

    #[serde(flatten)]
    pub summary: Summary,
}

impl TestKeys {
    pub fn new() -> Self {
        Self {
            agent: "redirect".to_string(),
            ..Self::default()
        }
    }
}

/// Formats an endpoint the way the control response keys it, bracketing
/// IPv6 addresses.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_should_bracket_ipv6() {
        let entry = TcpConnectEntry {
            ip: "2606:4700::1111".to_string(),
            port: 443,
            ..Default::default()
        };
        assert_eq!(entry.endpoint(), "[2606:4700::1111]:443");
        assert_eq!(join_host_port("1.1.1.1", 80), "1.1.1.1:80");
    }

    #[test]
    fn test_keys_should_serialize_flat_analysis_fields() {
        let tk = TestKeys::new();
        let value = serde_json::to_value(&tk).unwrap();

        assert_eq!(value["agent"], "redirect");
        assert!(value["dns_consistency"].is_null());
        assert!(value["status_code_match"].is_null());
        assert!(value["accessible"].is_null());
        assert!(value["blocking"].is_null());
        assert_eq!(value["x_status"], 0);
        assert!(value.get("tcp_connect_attempts").is_none());
        assert!(value.get("control_request").is_none());
    }

    #[test]
    fn tcp_status_should_omit_unknown_blocking() {
        let mut status = TcpConnectStatus {
            success: false,
            failure: Some("connection_refused".to_string()),
            blocked: None,
        };
        let value = serde_json::to_value(&status).unwrap();
        assert!(value.get("blocked").is_none());
        assert_eq!(value["failure"], "connection_refused");

        status.blocked = Some(true);
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["blocked"], true);

        let parsed: TcpConnectStatus =
            serde_json::from_str(r#"{"success":true,"failure":null}"#).unwrap();
        assert_eq!(parsed.blocked, None);
    }
}
