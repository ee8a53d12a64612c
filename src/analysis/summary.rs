//! Final verdict of a run.

use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::dns::DnsConsistency;
use crate::model::TestKeys;
use crate::netx::failure::{
    FAILURE_CONNECTION_REFUSED, FAILURE_CONNECTION_RESET, FAILURE_DNS_NXDOMAIN_ERROR,
    FAILURE_EOF_ERROR, FAILURE_GENERIC_TIMEOUT_ERROR, FAILURE_SSL_INVALID_CERTIFICATE,
    FAILURE_SSL_INVALID_HOSTNAME, FAILURE_SSL_UNKNOWN_AUTHORITY,
};

pub const STATUS_SUCCESS_SECURE: i64 = 1 << 0;
pub const STATUS_SUCCESS_CLEARTEXT: i64 = 1 << 1;
pub const STATUS_SUCCESS_NXDOMAIN: i64 = 1 << 2;
pub const STATUS_ANOMALY_CONTROL_UNREACHABLE: i64 = 1 << 3;
pub const STATUS_ANOMALY_CONTROL_FAILURE: i64 = 1 << 4;
pub const STATUS_ANOMALY_DNS: i64 = 1 << 5;
pub const STATUS_ANOMALY_HTTP_DIFF: i64 = 1 << 6;
pub const STATUS_ANOMALY_CONNECT: i64 = 1 << 7;
pub const STATUS_ANOMALY_READ_WRITE: i64 = 1 << 8;
pub const STATUS_ANOMALY_UNKNOWN: i64 = 1 << 9;
pub const STATUS_ANOMALY_TLS_HANDSHAKE: i64 = 1 << 10;
pub const STATUS_EXPERIMENT_DNS: i64 = 1 << 11;
pub const STATUS_EXPERIMENT_CONNECT: i64 = 1 << 12;
pub const STATUS_EXPERIMENT_HTTP: i64 = 1 << 13;
pub const STATUS_BUG_NO_REQUESTS: i64 = 1 << 14;

/// Where we think the interference happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockingReason {
    #[serde(rename = "dns")]
    Dns,
    #[serde(rename = "tcp_ip")]
    TcpIp,
    #[serde(rename = "http-failure")]
    HttpFailure,
    #[serde(rename = "http-diff")]
    HttpDiff,
}

impl BlockingReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dns => "dns",
            Self::TcpIp => "tcp_ip",
            Self::HttpFailure => "http-failure",
            Self::HttpDiff => "http-diff",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "dns" => Some(Self::Dns),
            "tcp_ip" => Some(Self::TcpIp),
            "http-failure" => Some(Self::HttpFailure),
            "http-diff" => Some(Self::HttpDiff),
            _ => None,
        }
    }
}

impl fmt::Display for BlockingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The externally visible `blocking` key: `null`, `false` or a reason.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Blocking {
    #[default]
    Undetermined,
    NotBlocked,
    Blocked(BlockingReason),
}

impl Serialize for Blocking {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Undetermined => serializer.serialize_none(),
            Self::NotBlocked => serializer.serialize_bool(false),
            Self::Blocked(reason) => serializer.serialize_str(reason.as_str()),
        }
    }
}

impl<'de> Deserialize<'de> for Blocking {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BlockingVisitor;

        impl<'de> Visitor<'de> for BlockingVisitor {
            type Value = Blocking;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("null, false or a blocking reason")
            }

            fn visit_unit<E: de::Error>(self) -> Result<Blocking, E> {
                Ok(Blocking::Undetermined)
            }

            fn visit_none<E: de::Error>(self) -> Result<Blocking, E> {
                Ok(Blocking::Undetermined)
            }

            fn visit_some<D: Deserializer<'de>>(
                self,
                deserializer: D,
            ) -> Result<Blocking, D::Error> {
                deserializer.deserialize_any(self)
            }

            fn visit_bool<E: de::Error>(self, value: bool) -> Result<Blocking, E> {
                if value {
                    return Err(E::invalid_value(de::Unexpected::Bool(true), &self));
                }
                Ok(Blocking::NotBlocked)
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Blocking, E> {
                BlockingReason::parse(value)
                    .map(Blocking::Blocked)
                    .ok_or_else(|| E::invalid_value(de::Unexpected::Str(value), &self))
            }
        }

        deserializer.deserialize_option(BlockingVisitor)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// `None` when the run could not decide.
    pub accessible: Option<bool>,
    /// Meaningful only when `accessible` is `Some(false)`.
    #[serde(skip)]
    pub blocking_reason: Option<BlockingReason>,
    pub blocking: Blocking,
    #[serde(rename = "x_status")]
    pub status: i64,
}

impl Summary {
    fn accessible(status: i64) -> Self {
        Self {
            accessible: Some(true),
            status,
            ..Self::default()
        }
    }

    fn blocked(reason: BlockingReason, status: i64) -> Self {
        Self {
            accessible: Some(false),
            blocking_reason: Some(reason),
            status,
            ..Self::default()
        }
    }

    fn undetermined(status: i64) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Sets `blocking` from `accessible` and `blocking_reason`.
    fn finish(mut self) -> Self {
        self.blocking = determine_blocking(&self);
        self
    }

    pub fn log(&self) {
        info!(
            accessible = ?self.accessible,
            blocking = self.blocking_reason.map_or("null", |r| r.as_str()),
            status = self.status,
            "summary"
        );
    }
}

/// `false` when accessible, otherwise the blocking reason if any.
pub fn determine_blocking(summary: &Summary) -> Blocking {
    if summary.accessible == Some(true) {
        return Blocking::NotBlocked;
    }
    summary
        .blocking_reason
        .map_or(Blocking::Undetermined, Blocking::Blocked)
}

/// Classifies a finished run. The first matching rule wins.
pub fn summarize(tk: &TestKeys) -> Summary {
    classify(tk).finish()
}

fn classify(tk: &TestKeys) -> Summary {
    let consistency = tk.dns_analysis.dns_consistency;
    let first = tk.requests.first();

    if let Some(request) = first {
        if request.failure.is_none() && request.request.url.starts_with("https://") {
            return Summary::accessible(STATUS_SUCCESS_SECURE);
        }
    }

    if tk.control_failure.is_some() {
        return Summary::undetermined(STATUS_ANOMALY_CONTROL_UNREACHABLE);
    }

    if tk.dns_experiment_failure.as_deref() == Some(FAILURE_DNS_NXDOMAIN_ERROR) {
        if consistency == Some(DnsConsistency::Consistent) {
            return Summary::accessible(STATUS_SUCCESS_NXDOMAIN | STATUS_EXPERIMENT_DNS);
        }
        return Summary::blocked(BlockingReason::Dns, STATUS_ANOMALY_DNS | STATUS_EXPERIMENT_DNS);
    }

    if tk.tcp_connect_attempts > 0 && tk.tcp_connect_successes == 0 {
        if let Some(consistency) = consistency {
            let status = STATUS_ANOMALY_CONNECT | STATUS_EXPERIMENT_CONNECT;
            return match consistency {
                DnsConsistency::Consistent => Summary::blocked(BlockingReason::TcpIp, status),
                DnsConsistency::Inconsistent => {
                    Summary::blocked(BlockingReason::Dns, status | STATUS_ANOMALY_DNS)
                }
            };
        }
    }

    if tk.control.http_request.failure.is_some() {
        return Summary::undetermined(STATUS_ANOMALY_CONTROL_FAILURE);
    }

    let Some(first) = first else {
        return Summary::undetermined(STATUS_BUG_NO_REQUESTS);
    };

    if let Some(failure) = &first.failure {
        let mut out = match classify_http_failure(failure) {
            Some((reason, flag)) => Summary::blocked(reason, STATUS_EXPERIMENT_HTTP | flag),
            None => Summary::undetermined(STATUS_EXPERIMENT_HTTP),
        };
        if out.blocking_reason.is_some()
            && tk.requests.len() == 1
            && consistency == Some(DnsConsistency::Inconsistent)
        {
            out.blocking_reason = Some(BlockingReason::Dns);
            out.status |= STATUS_ANOMALY_DNS;
        }
        return out;
    }

    let http = &tk.http_analysis;
    if http.status_code_match == Some(true)
        && (http.body_length_match == Some(true)
            || http.headers_match == Some(true)
            || http.title_match == Some(true))
    {
        return Summary::accessible(STATUS_SUCCESS_CLEARTEXT);
    }

    if consistency == Some(DnsConsistency::Inconsistent) {
        return Summary::blocked(
            BlockingReason::Dns,
            STATUS_ANOMALY_HTTP_DIFF | STATUS_ANOMALY_DNS,
        );
    }
    Summary::blocked(BlockingReason::HttpDiff, STATUS_ANOMALY_HTTP_DIFF)
}

/// Reason and status flag for a failed first HTTP request.
fn classify_http_failure(failure: &str) -> Option<(BlockingReason, i64)> {
    let classified = match failure {
        FAILURE_CONNECTION_REFUSED => (BlockingReason::HttpFailure, STATUS_ANOMALY_CONNECT),
        FAILURE_CONNECTION_RESET | FAILURE_EOF_ERROR => {
            (BlockingReason::HttpFailure, STATUS_ANOMALY_READ_WRITE)
        }
        FAILURE_DNS_NXDOMAIN_ERROR => (BlockingReason::Dns, STATUS_ANOMALY_DNS),
        FAILURE_GENERIC_TIMEOUT_ERROR => (BlockingReason::HttpFailure, STATUS_ANOMALY_UNKNOWN),
        FAILURE_SSL_INVALID_HOSTNAME
        | FAILURE_SSL_INVALID_CERTIFICATE
        | FAILURE_SSL_UNKNOWN_AUTHORITY => {
            (BlockingReason::HttpFailure, STATUS_ANOMALY_TLS_HANDSHAKE)
        }
        _ => return None,
    };
    Some(classified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{DnsAnalysisResult, HttpAnalysisResult};
    use crate::model::testkeys::{HttpRequestRecord, RequestEntry};

    fn request(url: &str, failure: Option<&str>) -> RequestEntry {
        RequestEntry {
            failure: failure.map(str::to_string),
            request: HttpRequestRecord {
                method: "GET".to_string(),
                url: url.to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn consistent(tk: &mut TestKeys, value: DnsConsistency) {
        tk.dns_analysis = DnsAnalysisResult {
            dns_consistency: Some(value),
        };
    }

    #[test]
    fn https_success_should_win_over_everything() {
        let mut tk = TestKeys::new();
        tk.requests = vec![request("https://example.com/", None)];
        tk.control_failure = Some("generic_timeout_error".to_string());
        tk.dns_experiment_failure = Some(FAILURE_DNS_NXDOMAIN_ERROR.to_string());
        tk.tcp_connect_attempts = 3;

        let summary = summarize(&tk);
        assert_eq!(summary.accessible, Some(true));
        assert_eq!(summary.blocking, Blocking::NotBlocked);
        assert_eq!(summary.blocking_reason, None);
        assert_ne!(summary.status & STATUS_SUCCESS_SECURE, 0);
    }

    #[test]
    fn unreachable_control_should_be_undetermined() {
        let mut tk = TestKeys::new();
        tk.requests = vec![request("http://example.com/", None)];
        tk.control_failure = Some("connection_refused".to_string());

        let summary = summarize(&tk);
        assert_eq!(summary.accessible, None);
        assert_eq!(summary.blocking, Blocking::Undetermined);
        assert_eq!(summary.status, STATUS_ANOMALY_CONTROL_UNREACHABLE);
    }

    #[test]
    fn nxdomain_should_depend_on_consistency() {
        let mut tk = TestKeys::new();
        tk.dns_experiment_failure = Some(FAILURE_DNS_NXDOMAIN_ERROR.to_string());
        consistent(&mut tk, DnsConsistency::Consistent);
        let summary = summarize(&tk);
        assert_eq!(summary.accessible, Some(true));
        assert_eq!(summary.status, STATUS_SUCCESS_NXDOMAIN | STATUS_EXPERIMENT_DNS);

        consistent(&mut tk, DnsConsistency::Inconsistent);
        let summary = summarize(&tk);
        assert_eq!(summary.accessible, Some(false));
        assert_eq!(summary.blocking, Blocking::Blocked(BlockingReason::Dns));
    }

    #[test]
    fn failed_connects_should_blame_tcp_ip_when_dns_is_consistent() {
        let mut tk = TestKeys::new();
        tk.tcp_connect_attempts = 7;
        tk.tcp_connect_successes = 0;
        consistent(&mut tk, DnsConsistency::Consistent);

        let summary = summarize(&tk);
        assert_eq!(summary.accessible, Some(false));
        assert_eq!(summary.blocking_reason, Some(BlockingReason::TcpIp));
        assert_eq!(summary.blocking, Blocking::Blocked(BlockingReason::TcpIp));

        consistent(&mut tk, DnsConsistency::Inconsistent);
        assert_eq!(summarize(&tk).blocking_reason, Some(BlockingReason::Dns));
    }

    #[test]
    fn failed_connects_without_dns_analysis_should_fall_through() {
        let mut tk = TestKeys::new();
        tk.tcp_connect_attempts = 2;
        tk.control.http_request.failure = Some("unknown_error".to_string());

        let summary = summarize(&tk);
        assert_eq!(summary.accessible, None);
        assert_eq!(summary.status, STATUS_ANOMALY_CONTROL_FAILURE);
    }

    #[test]
    fn missing_requests_should_be_flagged_as_bug() {
        let tk = TestKeys::new();
        let summary = summarize(&tk);
        assert_eq!(summary.accessible, None);
        assert_eq!(summary.status, STATUS_BUG_NO_REQUESTS);
    }

    #[test]
    fn http_failures_should_map_to_reasons() {
        let cases = [
            (FAILURE_CONNECTION_REFUSED, Some(BlockingReason::HttpFailure)),
            (FAILURE_CONNECTION_RESET, Some(BlockingReason::HttpFailure)),
            (FAILURE_EOF_ERROR, Some(BlockingReason::HttpFailure)),
            (FAILURE_GENERIC_TIMEOUT_ERROR, Some(BlockingReason::HttpFailure)),
            (FAILURE_SSL_UNKNOWN_AUTHORITY, Some(BlockingReason::HttpFailure)),
            (FAILURE_DNS_NXDOMAIN_ERROR, Some(BlockingReason::Dns)),
            ("unknown_failure: weird", None),
        ];
        for (failure, expected) in cases {
            let mut tk = TestKeys::new();
            tk.requests = vec![request("http://example.com/", Some(failure))];
            let summary = summarize(&tk);
            assert_eq!(summary.blocking_reason, expected, "{failure}");
            assert_ne!(summary.status & STATUS_EXPERIMENT_HTTP, 0);
            if expected.is_none() {
                assert_eq!(summary.accessible, None);
            }
        }
    }

    #[test]
    fn single_hop_failure_with_bad_dns_should_blame_dns() {
        let mut tk = TestKeys::new();
        tk.requests = vec![request("http://example.com/", Some(FAILURE_CONNECTION_RESET))];
        consistent(&mut tk, DnsConsistency::Inconsistent);
        assert_eq!(summarize(&tk).blocking_reason, Some(BlockingReason::Dns));

        tk.requests.insert(0, request("http://www.example.com/", Some(FAILURE_CONNECTION_RESET)));
        assert_eq!(summarize(&tk).blocking_reason, Some(BlockingReason::HttpFailure));
    }

    #[test]
    fn matching_page_should_be_accessible() {
        let mut tk = TestKeys::new();
        tk.requests = vec![request("http://example.com/", None)];
        tk.http_analysis = HttpAnalysisResult {
            status_code_match: Some(true),
            title_match: Some(true),
            ..Default::default()
        };
        let summary = summarize(&tk);
        assert_eq!(summary.accessible, Some(true));
        assert_eq!(summary.status, STATUS_SUCCESS_CLEARTEXT);
    }

    #[test]
    fn different_page_should_be_http_diff_or_dns() {
        let mut tk = TestKeys::new();
        tk.requests = vec![request("http://example.com/", None)];
        tk.http_analysis = HttpAnalysisResult {
            status_code_match: Some(true),
            body_length_match: Some(false),
            ..Default::default()
        };
        assert_eq!(summarize(&tk).blocking_reason, Some(BlockingReason::HttpDiff));

        consistent(&mut tk, DnsConsistency::Inconsistent);
        assert_eq!(summarize(&tk).blocking_reason, Some(BlockingReason::Dns));
    }

    #[test]
    fn blocking_should_follow_accessible() {
        let mut tk = TestKeys::new();
        let inputs: Vec<TestKeys> = {
            let mut all = vec![tk.clone()];
            tk.requests = vec![request("https://example.com/", None)];
            all.push(tk.clone());
            tk.requests = vec![request("http://example.com/", Some(FAILURE_EOF_ERROR))];
            all.push(tk.clone());
            tk.control_failure = Some("eof_error".to_string());
            all.push(tk.clone());
            all
        };
        for tk in &inputs {
            let summary = summarize(tk);
            match summary.accessible {
                Some(true) => {
                    assert_eq!(summary.blocking, Blocking::NotBlocked);
                    assert_eq!(summary.blocking_reason, None);
                }
                None => assert_eq!(summary.blocking, Blocking::Undetermined),
                Some(false) => assert!(matches!(summary.blocking, Blocking::Blocked(_))),
            }
        }
    }

    #[test]
    fn blocking_should_use_legacy_json_shape() {
        assert_eq!(serde_json::to_value(Blocking::Undetermined).unwrap(), serde_json::Value::Null);
        assert_eq!(serde_json::to_value(Blocking::NotBlocked).unwrap(), serde_json::json!(false));
        assert_eq!(
            serde_json::to_value(Blocking::Blocked(BlockingReason::HttpDiff)).unwrap(),
            serde_json::json!("http-diff")
        );

        let parsed: Blocking = serde_json::from_str("\"tcp_ip\"").unwrap();
        assert_eq!(parsed, Blocking::Blocked(BlockingReason::TcpIp));
        let parsed: Blocking = serde_json::from_str("null").unwrap();
        assert_eq!(parsed, Blocking::Undetermined);
        assert!(serde_json::from_str::<Blocking>("true").is_err());
    }
}
