//! A scripted network shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use url::Url;

use webconnectivity::geoip::{AsnEntry, AsnTable};
use webconnectivity::netx::failure::{
    FAILURE_CONNECTION_REFUSED, FAILURE_DNS_NXDOMAIN_ERROR, FAILURE_SSL_UNKNOWN_AUTHORITY,
};
use webconnectivity::netx::{
    BoxConn, Dialer, Failure, HttpClient, HttpRequest, HttpResponse, Netx, Operation, Resolver,
    TlsConn, TlsHandshaker, TlsState,
};

pub const EXAMPLE_IP: &str = "93.184.216.34";
pub const EXAMPLE_BODY: &str = "<!doctype html><html><head><title>Example Domain</title></head>\
<body><h1>Example Domain</h1><p>This domain is for use in illustrative examples.</p></body></html>";

/// Names resolve, endpoints accept and URLs answer only when told to.
/// Everything else fails the way a real network would.
#[derive(Default)]
pub struct FakeNetwork {
    names: HashMap<String, Vec<IpAddr>>,
    reachable: HashSet<SocketAddr>,
    untrusted: HashSet<String>,
    stalled_names: HashSet<String>,
    stalled_endpoints: HashSet<SocketAddr>,
    pages: HashMap<String, HttpResponse>,
    pub dialed: Mutex<Vec<SocketAddr>>,
    pub fetched: Mutex<Vec<HttpRequest>>,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// example.com serving the example page over HTTP and HTTPS.
    pub fn example() -> Self {
        Self::new()
            .name("example.com", &[EXAMPLE_IP])
            .endpoint(&format!("{EXAMPLE_IP}:80"))
            .endpoint(&format!("{EXAMPLE_IP}:443"))
            .page("http://example.com/", example_page())
            .page("https://example.com/", example_page())
    }

    pub fn name(mut self, host: &str, ips: &[&str]) -> Self {
        let ips = ips.iter().map(|ip| ip.parse().unwrap()).collect();
        self.names.insert(host.to_string(), ips);
        self
    }

    pub fn endpoint(mut self, addr: &str) -> Self {
        self.reachable.insert(addr.parse().unwrap());
        self
    }

    pub fn untrusted(mut self, server_name: &str) -> Self {
        self.untrusted.insert(server_name.to_string());
        self
    }

    /// Lookups of `host` never answer.
    pub fn stalled_name(mut self, host: &str) -> Self {
        self.stalled_names.insert(host.to_string());
        self
    }

    /// Connections to `addr` never complete.
    pub fn stalled_endpoint(mut self, addr: &str) -> Self {
        self.stalled_endpoints.insert(addr.parse().unwrap());
        self
    }

    pub fn page(mut self, url: &str, response: HttpResponse) -> Self {
        self.pages.insert(url.to_string(), response);
        self
    }

    pub fn dialed(&self) -> Vec<SocketAddr> {
        self.dialed.lock().unwrap().clone()
    }

    pub fn fetched(&self) -> Vec<HttpRequest> {
        self.fetched.lock().unwrap().clone()
    }
}

/// Builds the collaborators; the returned handle keeps the call logs.
pub fn netx(network: FakeNetwork) -> (Netx, Arc<FakeNetwork>) {
    let network = Arc::new(network);
    let asn_table = AsnTable::from_entries(&[AsnEntry {
        prefix: "93.184.216.0/24".parse().unwrap(),
        asn: 15133,
        org: "Edgecast".to_string(),
    }]);
    let fake = Fake(Arc::clone(&network));
    let netx = Netx {
        resolver: Arc::new(fake.clone()),
        dialer: Arc::new(fake.clone()),
        tls_handshaker: Arc::new(fake.clone()),
        http_client: Arc::new(fake),
        asn_lookup: Arc::new(asn_table),
    };
    (netx, network)
}

pub fn page(status_code: u16, headers: &[(&str, &str)], body: &str) -> HttpResponse {
    HttpResponse {
        status_code,
        headers: headers
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect(),
        body: body.as_bytes().to_vec(),
        body_is_truncated: false,
    }
}

pub fn example_page() -> HttpResponse {
    page(
        200,
        &[("content-type", "text/html; charset=UTF-8"), ("etag", "\"3147526947\"")],
        EXAMPLE_BODY,
    )
}

pub fn redirect(location: &str) -> HttpResponse {
    page(301, &[("location", location)], "")
}

#[derive(Clone)]
struct Fake(Arc<FakeNetwork>);

impl Fake {
    fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, Failure> {
        self.0
            .names
            .get(host)
            .cloned()
            .ok_or_else(|| Failure::new(FAILURE_DNS_NXDOMAIN_ERROR, Operation::Resolve))
    }
}

#[async_trait]
impl Resolver for Fake {
    async fn lookup_host(&self, host: &str) -> Result<Vec<IpAddr>, Failure> {
        if self.0.stalled_names.contains(host) {
            std::future::pending::<()>().await;
        }
        self.lookup(host)
    }
}

#[async_trait]
impl Dialer for Fake {
    async fn dial(&self, addr: SocketAddr) -> Result<BoxConn, Failure> {
        self.0.dialed.lock().unwrap().push(addr);
        if self.0.stalled_endpoints.contains(&addr) {
            std::future::pending::<()>().await;
        }
        if !self.0.reachable.contains(&addr) {
            return Err(Failure::new(FAILURE_CONNECTION_REFUSED, Operation::Connect));
        }
        let (conn, _peer) = tokio::io::duplex(64);
        Ok(Box::new(conn))
    }
}

#[async_trait]
impl TlsHandshaker for Fake {
    async fn handshake(&self, conn: BoxConn, server_name: &str) -> Result<TlsConn, Failure> {
        if self.0.untrusted.contains(server_name) {
            return Err(Failure::new(FAILURE_SSL_UNKNOWN_AUTHORITY, Operation::TlsHandshake));
        }
        Ok(TlsConn {
            conn,
            state: TlsState {
                negotiated_protocol: Some("http/1.1".to_string()),
                tls_version: Some("TLSv1.3".to_string()),
                peer_certificate: None,
            },
        })
    }
}

#[async_trait]
impl HttpClient for Fake {
    async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, Failure> {
        self.0.fetched.lock().unwrap().push(request.clone());
        if let Some(response) = self.0.pages.get(request.url.as_str()) {
            return Ok(response.clone());
        }
        let host = request.url.host_str().unwrap_or_default();
        if request.pinned_addrs.is_empty() {
            self.lookup(host)?;
        }
        Err(Failure::new(FAILURE_CONNECTION_REFUSED, Operation::Connect))
    }
}

pub fn url(raw: &str) -> Url {
    Url::parse(raw).unwrap()
}
