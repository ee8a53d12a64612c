//! Error types for the web connectivity probe and test helper.
//!
//! Network failures observed while measuring are never reported through these
//! types: they are normalised into failure strings by [`crate::netx::failure`]
//! and stored inside the measurement. The errors below are for conditions that
//! prevent a measurement from existing at all.

use std::io;
use std::net::AddrParseError;

use thiserror::Error;

use crate::netx::Failure;
use crate::netx::failure::{FAILURE_HTTP_UNEXPECTED_STATUS_CODE, FAILURE_JSON_PARSE_ERROR};

/// Main error type for the crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    Input(#[from] InputError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("resolver error: {0}")]
    Resolver(#[from] trust_dns_resolver::error::ResolveError),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),
}

/// Input validation errors. These abort a run before any record exists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("no input provided")]
    NoInput,

    #[error("input is not an URL")]
    InvalidUrl,

    #[error("unsupported input scheme: {0:?}")]
    UnsupportedScheme(String),

    #[error("no available test helpers")]
    NoTestHelpers,
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[source] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] serde_yaml::Error),

    #[error("invalid name server address: {0}")]
    InvalidNameServer(#[source] AddrParseError),

    #[error("invalid test helper URL {url:?}")]
    InvalidTestHelper { url: String },

    #[error("validation failed: {0}")]
    Validation(String),
}

/// Errors raised while talking to a control test helper.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("cannot reach test helper: {0}")]
    Transport(#[from] Failure),

    #[error("test helper replied with status {0}")]
    UnexpectedStatus(u16),

    #[error("cannot decode test helper response: {0}")]
    Decode(#[source] serde_json::Error),
}

impl ControlError {
    /// The failure string recorded as `control_failure`.
    pub fn failure(&self) -> String {
        match self {
            Self::Transport(failure) => failure.as_str().to_string(),
            Self::UnexpectedStatus(_) => FAILURE_HTTP_UNEXPECTED_STATUS_CODE.to_string(),
            Self::Decode(_) => FAILURE_JSON_PARSE_ERROR.to_string(),
        }
    }
}

/// Reasons the test helper rejects a request with 400.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("method {0} not allowed")]
    Method(String),

    #[error("content type must be application/json")]
    ContentType,

    #[error("request body larger than {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("cannot read request body: {0}")]
    Body(String),

    #[error("malformed request: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL not acceptable: {0:?}")]
    InvalidUrl(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;
