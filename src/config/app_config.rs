use std::fs;
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rustls::{ClientConfig, RootCertStore};
use tracing::{debug, info, warn};
use trust_dns_resolver::TokioAsyncResolver;
use trust_dns_resolver::config::{
    NameServerConfig, NameServerConfigGroup, Protocol, ResolverConfig, ResolverOpts,
};
use url::Url;

use super::model::{Config, HelperConfig, ProbeConfig};
use crate::error::{ConfigError, Result};
use crate::geoip::AsnTable;
use crate::helper::HelperSettings;
use crate::netx::bogon::BogonResolver;
use crate::netx::system::{ReqwestHttpClient, RustlsHandshaker, SystemResolver, TcpDialer};
use crate::netx::{Netx, Resolver};
use crate::probe::ProbeSettings;

/// Used when no configuration file is given.
pub const DEFAULT_CONFIG_FILE: &str = "config.yml";

/// Loads the configuration.
///
/// An explicitly given file must exist. Without one, `config.yml` is read
/// when present and defaults are used otherwise.
pub fn load_config(path: Option<&Path>) -> std::result::Result<Config, ConfigError> {
    let (path, explicit) = match path {
        Some(path) => (path, true),
        None => (Path::new(DEFAULT_CONFIG_FILE), false),
    };
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if !explicit && err.kind() == ErrorKind::NotFound => {
            info!("no {DEFAULT_CONFIG_FILE} found, using defaults");
            return Ok(Config::default());
        }
        Err(err) => return Err(ConfigError::ReadFile(err)),
    };
    info!(path = %path.display(), "loaded configuration");
    parse_config(&contents)
}

/// Parses and validates a YAML configuration.
pub fn parse_config(contents: &str) -> std::result::Result<Config, ConfigError> {
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let config: Config = serde_yaml::from_str(contents).map_err(ConfigError::Parse)?;
    config.validate()?;
    Ok(config)
}

impl Config {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.probe.test_helper_urls()?;
        name_server_ips(&self.dns.name_servers)?;

        if self.probe.timeout_seconds == 0 {
            return Err(ConfigError::Validation("probe.timeout_seconds must be positive".into()));
        }
        if self.probe.max_body_snapshot == 0 {
            return Err(ConfigError::Validation("probe.max_body_snapshot must be positive".into()));
        }
        if self.helper.listen.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "helper.listen {:?} is not an ip:port address",
                self.helper.listen
            )));
        }
        if self.helper.stage_timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "helper.stage_timeout_seconds must be positive".into(),
            ));
        }
        if self.helper.max_in_flight == 0 {
            return Err(ConfigError::Validation("helper.max_in_flight must be positive".into()));
        }
        if self.helper.max_body_size == 0 {
            return Err(ConfigError::Validation("helper.max_body_size must be positive".into()));
        }
        Ok(())
    }
}

impl ProbeConfig {
    pub fn test_helper_urls(&self) -> std::result::Result<Vec<Url>, ConfigError> {
        self.test_helpers
            .iter()
            .map(|raw| match Url::parse(raw) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(url),
                _ => Err(ConfigError::InvalidTestHelper { url: raw.clone() }),
            })
            .collect()
    }

    pub fn settings(&self, client_resolver: Option<String>) -> ProbeSettings {
        ProbeSettings {
            timeout: Duration::from_secs(self.timeout_seconds),
            max_body_snapshot: self.max_body_snapshot,
            client_resolver,
        }
    }
}

impl HelperConfig {
    pub fn settings(&self) -> HelperSettings {
        HelperSettings {
            max_body_size: self.max_body_size,
            stage_timeout: Duration::from_secs(self.stage_timeout_seconds),
            max_in_flight: self.max_in_flight,
        }
    }
}

fn name_server_ips(name_servers: &[String]) -> std::result::Result<Vec<IpAddr>, ConfigError> {
    name_servers
        .iter()
        .map(|host| host.trim().parse::<IpAddr>().map_err(ConfigError::InvalidNameServer))
        .collect()
}

/// Builds a rustls client configuration trusting the platform roots.
pub fn setup_tls_config() -> Result<Arc<ClientConfig>> {
    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        warn!(error = %err, "skipping unreadable native certificate");
    }
    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    debug!(added, ignored, "loaded native root certificates");

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

/// Sets up a DNS resolver.
///
/// With no name servers the system configuration is used. Otherwise every
/// server is queried over UDP with TCP fallback, with 2 attempts and a 5
/// second timeout per attempt.
pub fn setup_resolver(name_servers: &[String]) -> Result<TokioAsyncResolver> {
    if name_servers.is_empty() {
        return Ok(TokioAsyncResolver::tokio_from_system_conf()?);
    }

    let mut opts = ResolverOpts::default();
    opts.attempts = 2;
    opts.timeout = Duration::from_secs(5);
    opts.cache_size = 1024;

    let mut group = NameServerConfigGroup::new();
    for ip in name_server_ips(name_servers)? {
        for protocol in [Protocol::Udp, Protocol::Tcp] {
            group.push(NameServerConfig {
                socket_addr: (ip, 53).into(),
                protocol,
                tls_dns_name: None,
                trust_negative_responses: false,
                bind_addr: None,
            });
        }
    }
    info!(?name_servers, "using DNS servers");

    let resolver_config = ResolverConfig::from_parts(None, vec![], group);
    Ok(TokioAsyncResolver::tokio(resolver_config, opts))
}

/// Collaborators for the probe: plain resolver, rustls, ASN table.
pub fn probe_netx(config: &Config) -> Result<Netx> {
    let resolver: Arc<dyn Resolver> =
        Arc::new(SystemResolver::new(setup_resolver(&config.dns.name_servers)?));
    let tls = setup_tls_config()?;
    let asn_table = AsnTable::from_entries(&config.probe.asn_table);

    Ok(Netx {
        resolver: Arc::clone(&resolver),
        dialer: Arc::new(TcpDialer),
        tls_handshaker: Arc::new(RustlsHandshaker::new(Arc::clone(&tls))),
        http_client: Arc::new(ReqwestHttpClient::new(resolver).with_tls(tls)),
        asn_lookup: Arc::new(asn_table),
    })
}

/// Collaborators for the test helper. Its HTTP client follows redirects
/// and refuses names resolving to bogons.
pub fn helper_netx(config: &Config) -> Result<Netx> {
    let resolver: Arc<dyn Resolver> =
        Arc::new(SystemResolver::new(setup_resolver(&config.dns.name_servers)?));
    let tls = setup_tls_config()?;
    let guarded: Arc<dyn Resolver> = Arc::new(BogonResolver::new(Arc::clone(&resolver)));

    Ok(Netx {
        resolver,
        dialer: Arc::new(TcpDialer),
        tls_handshaker: Arc::new(RustlsHandshaker::new(Arc::clone(&tls))),
        http_client: Arc::new(
            ReqwestHttpClient::new(guarded)
                .with_redirects(true)
                .with_cookies(true)
                .with_tls(tls),
        ),
        asn_lookup: Arc::new(AsnTable::new()),
    })
}
