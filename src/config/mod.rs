//! YAML configuration and the wiring of network collaborators from it.

pub mod app_config;
pub mod model;

pub use app_config::{
    helper_netx, load_config, parse_config, probe_netx, setup_resolver, setup_tls_config,
};
pub use model::{Config, DnsConfig, HelperConfig, ProbeConfig};
