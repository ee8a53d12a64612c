//! Network collaborators used by the probe and by the test helper.
//!
//! Each capability is a small trait so that measurement code can be driven by
//! the real implementations in [`system`] or by test doubles. Decorators such
//! as [`bogon::BogonResolver`] wrap another implementation of the same trait.

pub mod bogon;
pub mod failure;
pub mod system;

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use url::Url;

use crate::geoip::AsnLookup;
pub use failure::{Failure, Operation};

/// A bidirectional byte stream.
pub trait Conn: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Conn for T {}

pub type BoxConn = Box<dyn Conn>;

/// Resolves a host name to its addresses.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn lookup_host(&self, host: &str) -> Result<Vec<IpAddr>, Failure>;
}

/// Establishes TCP connections.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, addr: SocketAddr) -> Result<BoxConn, Failure>;
}

/// Performs a TLS handshake over an established connection.
#[async_trait]
pub trait TlsHandshaker: Send + Sync {
    async fn handshake(&self, conn: BoxConn, server_name: &str) -> Result<TlsConn, Failure>;
}

/// Sends a single HTTP GET and snapshots the response body.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, Failure>;
}

/// A connection on which a TLS handshake completed.
pub struct TlsConn {
    pub conn: BoxConn,
    pub state: TlsState,
}

/// What we learned from a successful handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsState {
    pub negotiated_protocol: Option<String>,
    pub tls_version: Option<String>,
    pub peer_certificate: Option<CertificateInfo>,
}

/// Leaf certificate details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    /// Expiry as a UNIX timestamp.
    pub not_after: i64,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: Url,
    pub headers: Vec<(String, String)>,
    /// Addresses to use for the URL host instead of resolving it again.
    pub pinned_addrs: Vec<IpAddr>,
    /// Maximum number of body bytes to keep.
    pub max_body: usize,
}

#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub body_is_truncated: bool,
}

/// The set of collaborators a measurement runs with.
#[derive(Clone)]
pub struct Netx {
    pub resolver: Arc<dyn Resolver>,
    pub dialer: Arc<dyn Dialer>,
    pub tls_handshaker: Arc<dyn TlsHandshaker>,
    pub http_client: Arc<dyn HttpClient>,
    pub asn_lookup: Arc<dyn AsnLookup>,
}
