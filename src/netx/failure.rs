//! Normalised failure vocabulary.
//!
//! Every transport error observed while measuring is mapped onto a small,
//! stable set of strings. The analysis and classification code only ever
//! compares against these strings, so their spelling is part of the data
//! format consumed downstream.

use std::error::Error as StdError;
use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use trust_dns_resolver::error::{ResolveError, ResolveErrorKind};
use trust_dns_resolver::proto::op::ResponseCode;

pub const FAILURE_CONNECTION_REFUSED: &str = "connection_refused";
pub const FAILURE_CONNECTION_RESET: &str = "connection_reset";
pub const FAILURE_CONNECTION_ABORTED: &str = "connection_aborted";
pub const FAILURE_DNS_BOGON_ERROR: &str = "dns_bogon_error";
pub const FAILURE_DNS_NXDOMAIN_ERROR: &str = "dns_nxdomain_error";
pub const FAILURE_DNS_NO_ANSWER: &str = "dns_no_answer";
pub const FAILURE_DNS_SERVER_MISBEHAVING: &str = "dns_server_misbehaving";
pub const FAILURE_DNS_REFUSED_ERROR: &str = "dns_refused_error";
pub const FAILURE_DNS_NON_RECOVERABLE_FAILURE: &str = "dns_non_recoverable_failure";
pub const FAILURE_DNS_TEMPORARY_FAILURE: &str = "dns_temporary_failure";
/// Emitted by some Android resolvers in place of NXDOMAIN.
pub const FAILURE_ANDROID_DNS_CACHE_NO_DATA: &str = "android_dns_cache_no_data";
pub const FAILURE_EOF_ERROR: &str = "eof_error";
pub const FAILURE_GENERIC_TIMEOUT_ERROR: &str = "generic_timeout_error";
pub const FAILURE_HOST_UNREACHABLE: &str = "host_unreachable";
pub const FAILURE_NETWORK_UNREACHABLE: &str = "network_unreachable";
pub const FAILURE_INTERRUPTED: &str = "interrupted";
pub const FAILURE_SSL_FAILED_HANDSHAKE: &str = "ssl_failed_handshake";
pub const FAILURE_SSL_INVALID_HOSTNAME: &str = "ssl_invalid_hostname";
pub const FAILURE_SSL_UNKNOWN_AUTHORITY: &str = "ssl_unknown_authority";
pub const FAILURE_SSL_INVALID_CERTIFICATE: &str = "ssl_invalid_certificate";
pub const FAILURE_JSON_PARSE_ERROR: &str = "json_parse_error";
pub const FAILURE_HTTP_UNEXPECTED_STATUS_CODE: &str = "http_unexpected_status_code";

/// The network operation during which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Resolve,
    Connect,
    TlsHandshake,
    HttpRoundTrip,
    Read,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Resolve => "resolve",
            Self::Connect => "connect",
            Self::TlsHandshake => "tls_handshake",
            Self::HttpRoundTrip => "http_round_trip",
            Self::Read => "read",
        };
        f.write_str(name)
    }
}

/// A classified network failure.
///
/// Collaborators return this as their error type so callers never need to
/// look at the underlying library errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    failure: String,
    operation: Operation,
}

impl Failure {
    pub fn new(failure: impl Into<String>, operation: Operation) -> Self {
        Self {
            failure: failure.into(),
            operation,
        }
    }

    /// A deadline expired while running `operation`.
    pub fn timeout(operation: Operation) -> Self {
        Self::new(FAILURE_GENERIC_TIMEOUT_ERROR, operation)
    }

    pub fn as_str(&self) -> &str {
        &self.failure
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn into_string(self) -> String {
        self.failure
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.failure)
    }
}

impl StdError for Failure {}

fn unknown_failure(err: &dyn fmt::Display) -> String {
    format!("unknown_failure: {err}")
}

/// Maps an I/O error to a failure string.
pub fn classify_io_error(err: &io::Error) -> String {
    use io::ErrorKind;

    if let Some(inner) = err.get_ref() {
        if let Some(tls) = inner.downcast_ref::<rustls::Error>() {
            return classify_tls_error(tls).to_string();
        }
        if let Some(failure) = inner.downcast_ref::<Failure>() {
            return failure.as_str().to_string();
        }
    }
    let failure = match err.kind() {
        ErrorKind::ConnectionRefused => FAILURE_CONNECTION_REFUSED,
        ErrorKind::ConnectionReset => FAILURE_CONNECTION_RESET,
        ErrorKind::ConnectionAborted => FAILURE_CONNECTION_ABORTED,
        ErrorKind::TimedOut => FAILURE_GENERIC_TIMEOUT_ERROR,
        ErrorKind::UnexpectedEof => FAILURE_EOF_ERROR,
        ErrorKind::HostUnreachable => FAILURE_HOST_UNREACHABLE,
        ErrorKind::NetworkUnreachable => FAILURE_NETWORK_UNREACHABLE,
        ErrorKind::Interrupted => FAILURE_INTERRUPTED,
        _ => return unknown_failure(err),
    };
    failure.to_string()
}

/// Maps a resolver error to a failure string.
pub fn classify_resolve_error(err: &ResolveError) -> String {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { response_code, .. } => match *response_code {
            ResponseCode::NXDomain => FAILURE_DNS_NXDOMAIN_ERROR.to_string(),
            ResponseCode::NoError => FAILURE_DNS_NO_ANSWER.to_string(),
            ResponseCode::Refused => FAILURE_DNS_REFUSED_ERROR.to_string(),
            ResponseCode::ServFail => FAILURE_DNS_SERVER_MISBEHAVING.to_string(),
            _ => FAILURE_DNS_NON_RECOVERABLE_FAILURE.to_string(),
        },
        ResolveErrorKind::Timeout => FAILURE_GENERIC_TIMEOUT_ERROR.to_string(),
        ResolveErrorKind::Io(io) => classify_io_error(io),
        ResolveErrorKind::NoConnections => FAILURE_DNS_TEMPORARY_FAILURE.to_string(),
        _ => unknown_failure(err),
    }
}

/// Maps a TLS error to a failure string.
pub fn classify_tls_error(err: &rustls::Error) -> &'static str {
    use rustls::CertificateError;

    match err {
        rustls::Error::InvalidCertificate(CertificateError::NotValidForName) => {
            FAILURE_SSL_INVALID_HOSTNAME
        }
        rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer) => {
            FAILURE_SSL_UNKNOWN_AUTHORITY
        }
        rustls::Error::InvalidCertificate(_) => FAILURE_SSL_INVALID_CERTIFICATE,
        _ => FAILURE_SSL_FAILED_HANDSHAKE,
    }
}

/// Maps a reqwest error to a [`Failure`].
///
/// The error chain is searched for a [`Failure`] first, which is how failures
/// produced by our own resolver surface through the client.
pub fn classify_reqwest_error(err: &reqwest::Error) -> Failure {
    let root: &(dyn StdError + 'static) = err;

    let mut source = Some(root);
    while let Some(current) = source {
        if let Some(failure) = current.downcast_ref::<Failure>() {
            return failure.clone();
        }
        source = current.source();
    }

    let operation = if err.is_connect() {
        Operation::Connect
    } else if err.is_body() || err.is_decode() {
        Operation::Read
    } else {
        Operation::HttpRoundTrip
    };
    if err.is_timeout() {
        return Failure::timeout(operation);
    }

    let mut source = Some(root);
    while let Some(current) = source {
        if let Some(tls) = current.downcast_ref::<rustls::Error>() {
            return Failure::new(classify_tls_error(tls), Operation::TlsHandshake);
        }
        if let Some(io) = current.downcast_ref::<io::Error>() {
            let tls_failure = io
                .get_ref()
                .is_some_and(|inner| inner.downcast_ref::<rustls::Error>().is_some());
            let operation = if tls_failure {
                Operation::TlsHandshake
            } else {
                operation
            };
            return Failure::new(classify_io_error(io), operation);
        }
        if let Some(hyper) = current.downcast_ref::<hyper::Error>() {
            if hyper.is_incomplete_message() {
                return Failure::new(FAILURE_EOF_ERROR, Operation::Read);
            }
            if hyper.is_timeout() {
                return Failure::timeout(operation);
            }
        }
        source = current.source();
    }

    Failure::new(unknown_failure(err), operation)
}
