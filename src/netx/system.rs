//! Collaborators backed by the real network.

use std::error::Error as StdError;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use rustls::ClientConfig;
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use trust_dns_resolver::TokioAsyncResolver;
use x509_parser::parse_x509_certificate;

use super::failure::{
    FAILURE_DNS_NO_ANSWER, FAILURE_SSL_INVALID_HOSTNAME, classify_io_error,
    classify_reqwest_error, classify_resolve_error,
};
use super::{
    BoxConn, CertificateInfo, Dialer, Failure, HttpClient, HttpRequest, HttpResponse, Operation,
    Resolver, TlsConn, TlsHandshaker, TlsState,
};

/// Resolver backed by a [`TokioAsyncResolver`].
#[derive(Clone)]
pub struct SystemResolver {
    inner: TokioAsyncResolver,
}

impl SystemResolver {
    pub fn new(inner: TokioAsyncResolver) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Resolver for SystemResolver {
    async fn lookup_host(&self, host: &str) -> Result<Vec<IpAddr>, Failure> {
        let lookup = self
            .inner
            .lookup_ip(host)
            .await
            .map_err(|err| Failure::new(classify_resolve_error(&err), Operation::Resolve))?;
        let addrs: Vec<IpAddr> = lookup.iter().collect();
        if addrs.is_empty() {
            return Err(Failure::new(FAILURE_DNS_NO_ANSWER, Operation::Resolve));
        }
        Ok(addrs)
    }
}

/// Plain TCP dialer.
#[derive(Clone, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, addr: SocketAddr) -> Result<BoxConn, Failure> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|err| Failure::new(classify_io_error(&err), Operation::Connect))?;
        Ok(Box::new(stream))
    }
}

/// TLS handshaker using rustls with the platform trust store.
#[derive(Clone)]
pub struct RustlsHandshaker {
    connector: TlsConnector,
}

impl RustlsHandshaker {
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self {
            connector: TlsConnector::from(config),
        }
    }
}

#[async_trait]
impl TlsHandshaker for RustlsHandshaker {
    async fn handshake(&self, conn: BoxConn, server_name: &str) -> Result<TlsConn, Failure> {
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|_| Failure::new(FAILURE_SSL_INVALID_HOSTNAME, Operation::TlsHandshake))?;
        let stream = self
            .connector
            .connect(name, conn)
            .await
            .map_err(|err| Failure::new(classify_io_error(&err), Operation::TlsHandshake))?;

        let (_, session) = stream.get_ref();
        let state = TlsState {
            negotiated_protocol: session
                .alpn_protocol()
                .map(|proto| String::from_utf8_lossy(proto).into_owned()),
            tls_version: session.protocol_version().map(|version| match version {
                rustls::ProtocolVersion::TLSv1_3 => "TLSv1.3".to_string(),
                rustls::ProtocolVersion::TLSv1_2 => "TLSv1.2".to_string(),
                other => format!("{other:?}"),
            }),
            peer_certificate: session
                .peer_certificates()
                .and_then(|chain| chain.first())
                .and_then(|der| parse_certificate(der.as_ref())),
        };
        Ok(TlsConn {
            conn: Box::new(stream),
            state,
        })
    }
}

fn parse_certificate(der: &[u8]) -> Option<CertificateInfo> {
    let (_, parsed) = parse_x509_certificate(der).ok()?;
    Some(CertificateInfo {
        subject: parsed.subject().to_string(),
        issuer: parsed.issuer().to_string(),
        not_after: parsed.validity().not_after.timestamp(),
    })
}

/// Lets reqwest resolve names through one of our [`Resolver`]s so that
/// resolution failures keep their classification.
struct ReqwestResolver(Arc<dyn Resolver>);

impl reqwest::dns::Resolve for ReqwestResolver {
    fn resolve(&self, name: reqwest::dns::Name) -> reqwest::dns::Resolving {
        let resolver = Arc::clone(&self.0);
        Box::pin(async move {
            let addrs = resolver
                .lookup_host(name.as_str())
                .await
                .map_err(|err| Box::new(err) as Box<dyn StdError + Send + Sync>)?;
            let addrs: reqwest::dns::Addrs =
                Box::new(addrs.into_iter().map(|ip| SocketAddr::new(ip, 0)));
            Ok(addrs)
        })
    }
}

/// HTTP client built on reqwest.
///
/// A fresh client is built for each request so that pinned addresses never
/// leak between measurements.
#[derive(Clone)]
pub struct ReqwestHttpClient {
    resolver: Arc<dyn Resolver>,
    follow_redirects: bool,
    cookies: bool,
    tls: Option<Arc<ClientConfig>>,
}

impl ReqwestHttpClient {
    pub fn new(resolver: Arc<dyn Resolver>) -> Self {
        Self {
            resolver,
            follow_redirects: false,
            cookies: false,
            tls: None,
        }
    }

    /// Let the client follow redirects on its own.
    pub fn with_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    /// Keep cookies set by the server across the redirects of one request.
    pub fn with_cookies(mut self, enabled: bool) -> Self {
        self.cookies = enabled;
        self
    }

    /// Use the same rustls configuration as the handshaker.
    pub fn with_tls(mut self, config: Arc<ClientConfig>) -> Self {
        self.tls = Some(config);
        self
    }

    fn build_client(&self, request: &HttpRequest) -> Result<reqwest::Client, Failure> {
        let policy = if self.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        };
        let mut builder = reqwest::Client::builder()
            .redirect(policy)
            .cookie_store(self.cookies)
            .no_proxy()
            .dns_resolver(Arc::new(ReqwestResolver(Arc::clone(&self.resolver))));
        if let Some(config) = &self.tls {
            builder = builder.use_preconfigured_tls(ClientConfig::clone(config));
        }

        if let Some(host) = request.url.host_str() {
            if !request.pinned_addrs.is_empty() {
                let port = request.url.port_or_known_default().unwrap_or(80);
                let addrs: Vec<SocketAddr> = request
                    .pinned_addrs
                    .iter()
                    .map(|ip| SocketAddr::new(*ip, port))
                    .collect();
                builder = builder.resolve_to_addrs(host, &addrs);
            }
        }

        builder.build().map_err(|err| classify_reqwest_error(&err))
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, Failure> {
        let client = self.build_client(request)?;
        let mut builder = client.get(request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        let mut response = builder
            .send()
            .await
            .map_err(|err| classify_reqwest_error(&err))?;

        let mut out = HttpResponse {
            status_code: response.status().as_u16(),
            ..Default::default()
        };
        for (name, value) in response.headers() {
            out.headers
                .entry(name.as_str().to_string())
                .or_insert_with(|| String::from_utf8_lossy(value.as_bytes()).into_owned());
        }

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| classify_reqwest_error(&err))?
        {
            let room = request.max_body.saturating_sub(out.body.len());
            if chunk.len() > room {
                out.body.extend_from_slice(&chunk[..room]);
                out.body_is_truncated = true;
                break;
            }
            out.body.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use bytes::Bytes;
    use http_body_util::Full;
    use hyper::header::{COOKIE, LOCATION, SET_COOKIE};
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use tokio::net::TcpListener;
    use url::Url;

    use super::*;

    struct Loopback;

    #[async_trait]
    impl Resolver for Loopback {
        async fn lookup_host(&self, _host: &str) -> Result<Vec<IpAddr>, Failure> {
            Ok(vec![IpAddr::from([127, 0, 0, 1])])
        }
    }

    /// Redirects `/` to `/landing` with a session cookie and refuses
    /// `/landing` without it.
    async fn session_site(
        request: Request<hyper::body::Incoming>,
    ) -> Result<Response<Full<Bytes>>, Infallible> {
        let response = match request.uri().path() {
            "/" => Response::builder()
                .status(StatusCode::FOUND)
                .header(LOCATION, "/landing")
                .header(SET_COOKIE, "session=1; Path=/")
                .body(Full::new(Bytes::new())),
            _ => {
                let has_session = request
                    .headers()
                    .get(COOKIE)
                    .and_then(|value| value.to_str().ok())
                    .is_some_and(|value| value.contains("session=1"));
                if has_session {
                    Response::builder().body(Full::new(Bytes::from_static(b"welcome back")))
                } else {
                    Response::builder()
                        .status(StatusCode::FORBIDDEN)
                        .body(Full::new(Bytes::from_static(b"no session")))
                }
            }
        };
        Ok(response.unwrap())
    }

    async fn start_site() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(
                    http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service_fn(session_site)),
                );
            }
        });
        addr
    }

    fn request(addr: SocketAddr) -> HttpRequest {
        HttpRequest {
            url: Url::parse(&format!("http://{addr}/")).unwrap(),
            headers: Vec::new(),
            pinned_addrs: Vec::new(),
            max_body: 1024,
        }
    }

    #[tokio::test]
    async fn should_carry_cookies_across_redirects() {
        let addr = start_site().await;
        let client = ReqwestHttpClient::new(Arc::new(Loopback))
            .with_redirects(true)
            .with_cookies(true);

        let response = client.get(&request(addr)).await.unwrap();

        assert_eq!(response.status_code, 200);
        assert_eq!(response.body, b"welcome back");
    }

    #[tokio::test]
    async fn should_drop_cookies_without_a_cookie_store() {
        let addr = start_site().await;
        let client = ReqwestHttpClient::new(Arc::new(Loopback)).with_redirects(true);

        let response = client.get(&request(addr)).await.unwrap();

        assert_eq!(response.status_code, 403);
    }
}
