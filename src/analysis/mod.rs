//! Comparison of probe observations with the control, and the resulting
//! blocking verdict.

pub mod dns;
pub mod http;
pub mod summary;
pub mod tcp;
pub mod title;

pub use dns::{DnsAnalysisResult, DnsConsistency, dns_analysis};
pub use http::{HttpAnalysisResult, http_analysis};
pub use summary::{Blocking, BlockingReason, Summary, determine_blocking, summarize};
pub use tcp::compute_tcp_blocking;
pub use title::extract_title;
