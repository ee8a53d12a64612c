//! Probe side of the experiment: measure a URL locally, ask the control
//! for its view, compare and classify.

pub mod connect;
pub mod control;
pub mod dns;
pub mod http;

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, timeout_at};
use tracing::info;
use url::{Host, Url};

use crate::analysis::{compute_tcp_blocking, dns_analysis, http_analysis, summarize};
use crate::error::{ControlError, InputError};
use crate::geoip::asn_number;
use crate::model::testkeys::DNS_FLAG_BOGON;
use crate::model::{ControlRequest, Measurement, endpoints_for};
use crate::netx::{Failure, Netx, Operation};
pub use control::{Control, ControlExchange, HelperClient};

pub const DEFAULT_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
pub const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US;q=0.8,en;q=0.5";
pub const DEFAULT_USER_AGENT: &str = concat!(
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) ",
    "AppleWebKit/537.36 (KHTML, like Gecko) ",
    "Chrome/124.0.0.0 Safari/537.36",
);

/// The only request headers sent to the target and forwarded to the control.
pub fn default_headers() -> Vec<(String, String)> {
    vec![
        ("Accept".to_string(), DEFAULT_ACCEPT.to_string()),
        ("Accept-Language".to_string(), DEFAULT_ACCEPT_LANGUAGE.to_string()),
        ("User-Agent".to_string(), DEFAULT_USER_AGENT.to_string()),
    ]
}

/// Receives progress updates while a run is in flight.
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, percentage: f64, message: &str);
}

/// Forwards progress to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressCallback for LogProgress {
    fn on_progress(&self, percentage: f64, message: &str) {
        info!("[{:>5.1}%] {message}", percentage * 100.0);
    }
}

#[derive(Debug, Clone)]
pub struct ProbeSettings {
    /// Bound on the whole run.
    pub timeout: Duration,
    /// Maximum number of response body bytes kept per hop.
    pub max_body_snapshot: usize,
    /// Address of the resolver in use, recorded as `client_resolver`.
    pub client_resolver: Option<String>,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_body_snapshot: 1 << 24,
            client_resolver: None,
        }
    }
}

/// Checks the input and returns it parsed.
pub fn validate_input(input: &str) -> Result<Url, InputError> {
    if input.is_empty() {
        return Err(InputError::NoInput);
    }
    let url = Url::parse(input).map_err(|_| InputError::InvalidUrl)?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(InputError::UnsupportedScheme(other.to_string())),
    }
    if url.host().is_none() {
        return Err(InputError::InvalidUrl);
    }
    Ok(url)
}

/// Runs the web connectivity experiment.
#[derive(Clone)]
pub struct Measurer {
    settings: ProbeSettings,
    netx: Netx,
    control: Arc<dyn Control>,
}

impl Measurer {
    pub fn new(settings: ProbeSettings, netx: Netx, control: Arc<dyn Control>) -> Self {
        Self {
            settings,
            netx,
            control,
        }
    }

    /// Measures `input`.
    ///
    /// Only invalid input is an error. Anything going wrong on the network
    /// ends up in the returned measurement.
    pub async fn run(
        &self,
        input: &str,
        progress: &dyn ProgressCallback,
    ) -> Result<Measurement, InputError> {
        let url = validate_input(input)?;
        if !self.control.is_available() {
            return Err(InputError::NoTestHelpers);
        }

        let started = Instant::now();
        let deadline = started + self.settings.timeout;
        let mut measurement = Measurement::new(input);
        let resolver_address = self.settings.client_resolver.clone().unwrap_or_default();
        let tk = &mut measurement.test_keys;
        tk.client_resolver = self.settings.client_resolver.clone();

        let dns = dns::lookup(&self.netx, &url, &resolver_address, deadline).await;
        tk.queries = dns.queries;
        tk.dns_experiment_failure = dns.result.failure.clone();
        if dns.bogon {
            tk.x_dns_flags |= DNS_FLAG_BOGON;
        }
        progress.on_progress(0.1, "DNS lookup done");

        let endpoints = endpoints_for(&url, &dns.result);
        let headers = default_headers();
        tk.control_request = ControlRequest {
            http_request: url.to_string(),
            http_request_headers: headers
                .iter()
                .map(|(name, value)| (name.clone(), vec![value.clone()]))
                .collect::<BTreeMap<_, _>>(),
            tcp_connect: endpoints.iter().map(ToString::to_string).collect(),
        };

        let server_name = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            None => String::new(),
        };
        let addrs = dns.result.ips();
        let request = tk.control_request.clone();
        let control = async {
            match timeout_at(deadline, self.control.exchange(&request)).await {
                Ok(result) => result,
                Err(_) => Err(ControlError::from(Failure::timeout(Operation::HttpRoundTrip))),
            }
        };
        let (control, connects, fetched) = tokio::join!(
            control,
            connect::connects(&self.netx, &endpoints, &server_name, deadline),
            http::get(
                &self.netx,
                &url,
                &addrs,
                &headers,
                self.settings.max_body_snapshot,
                deadline,
            ),
        );

        match control {
            Ok(exchange) => {
                info!(helper = %exchange.helper, "using control");
                let mut response = exchange.response;
                response.dns.asns = response
                    .dns
                    .addrs
                    .iter()
                    .map(|addr| {
                        addr.parse::<IpAddr>()
                            .map_or(0, |ip| asn_number(self.netx.asn_lookup.as_ref(), ip))
                    })
                    .collect();
                tk.control = response;
                measurement.test_helpers = Some(exchange.helper);
            }
            Err(err) => {
                info!(error = %err, "control exchange failed");
                tk.control_failure = Some(err.failure());
            }
        }
        progress.on_progress(0.4, "control exchange done");

        if tk.control_failure.is_none() {
            tk.dns_analysis = dns_analysis(&url, &dns.result, &tk.control);
        }
        info!(consistency = ?tk.dns_analysis.dns_consistency, "DNS analysis");

        tk.tcp_connect = compute_tcp_blocking(&connects.tcp_connect, &tk.control.tcp_connect);
        tk.tls_handshakes = connects.tls_handshakes;
        tk.tcp_connect_attempts = connects.attempts;
        tk.tcp_connect_successes = connects.successes;
        info!(
            "TCP/TLS endpoints: {}/{} reachable",
            connects.successes, connects.attempts
        );
        progress.on_progress(0.6, "TCP/TLS connects done");

        tk.requests = fetched.requests;
        tk.http_experiment_failure = fetched.failure;
        tk.http_analysis = http_analysis(&tk.requests, &tk.control);
        tk.http_analysis.log();
        progress.on_progress(0.8, "HTTP request done");

        tk.summary = summarize(tk);
        tk.summary.log();
        measurement.test_runtime = started.elapsed().as_secs_f64();
        progress.on_progress(1.0, "done");

        Ok(measurement)
    }
}
