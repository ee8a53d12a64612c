use serde::{Deserialize, Serialize};

use crate::geoip::AsnEntry;

/// Top level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub probe: ProbeConfig,

    #[serde(default)]
    pub dns: DnsConfig,

    #[serde(default)]
    pub helper: HelperConfig,
}

/// Settings of the `probe` subcommand.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeConfig {
    /// Control test helpers, tried in order.
    #[serde(default)]
    pub test_helpers: Vec<String>,

    /// Maximum number of response body bytes kept per HTTP hop.
    #[serde(default = "default_body_size")]
    pub max_body_snapshot: usize,

    /// Upper bound on a whole measurement.
    #[serde(default = "default_probe_timeout")]
    pub timeout_seconds: u64,

    /// Networks used to annotate addresses with their AS.
    #[serde(default)]
    pub asn_table: Vec<AsnEntry>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            test_helpers: Vec::new(),
            max_body_snapshot: default_body_size(),
            timeout_seconds: default_probe_timeout(),
            asn_table: Vec::new(),
        }
    }
}

/// Resolver settings shared by both subcommands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DnsConfig {
    /// Name server addresses. Empty means the system configuration.
    #[serde(default)]
    pub name_servers: Vec<String>,
}

/// Settings of the `helper` subcommand.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HelperConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_body_size")]
    pub max_body_size: usize,

    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_seconds: u64,

    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_body_size: default_body_size(),
            stage_timeout_seconds: default_stage_timeout(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

fn default_body_size() -> usize {
    1 << 24
}

fn default_probe_timeout() -> u64 {
    60
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_stage_timeout() -> u64 {
    15
}

fn default_max_in_flight() -> usize {
    50
}
