//! Web connectivity measurement.
//!
//! The probe side ([`probe::Measurer`]) resolves, connects to and fetches a
//! URL from the local network, asks a control test helper ([`helper`]) to do
//! the same from an unfiltered vantage point, and classifies the
//! differences ([`analysis`]) into a blocking verdict.

pub mod analysis;
pub mod config;
pub mod error;
pub mod geoip;
pub mod helper;
pub mod model;
pub mod netx;
pub mod probe;

pub use error::{Error, Result};
