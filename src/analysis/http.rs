//! Comparison of the probe's final HTTP response with the control's.
//!
//! Each check yields `None` when it cannot be decided, which the
//! classifier treats differently from a mismatch.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::title::{MAX_TITLE_LENGTH, extract_title};
use crate::model::ControlResponse;
use crate::model::testkeys::{HttpResponseRecord, RequestEntry};

/// Shorter title words are not compared.
pub const MIN_TITLE_WORD_LENGTH: usize = 5;

/// Smallest body length ratio still considered a match.
pub const BODY_PROPORTION_FACTOR: f64 = 0.7;

/// Headers expected to differ between two fetches of the same page.
pub const COMMON_HEADERS: &[&str] = &[
    "date",
    "content-type",
    "content-length",
    "server",
    "cache-control",
    "vary",
    "set-cookie",
    "location",
    "expires",
    "x-powered-by",
    "content-encoding",
    "last-modified",
    "accept-ranges",
    "pragma",
    "x-frame-options",
    "etag",
    "x-content-type-options",
    "age",
    "via",
    "p3p",
    "x-xss-protection",
    "content-language",
    "cf-ray",
    "strict-transport-security",
    "link",
    "x-varnish",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpAnalysisResult {
    pub body_length_match: Option<bool>,
    pub body_proportion: f64,
    pub status_code_match: Option<bool>,
    pub headers_match: Option<bool>,
    pub title_match: Option<bool>,
}

impl HttpAnalysisResult {
    pub fn log(&self) {
        info!(
            body_length_match = ?self.body_length_match,
            body_proportion = self.body_proportion,
            status_code_match = ?self.status_code_match,
            headers_match = ?self.headers_match,
            title_match = ?self.title_match,
            "http analysis"
        );
    }
}

/// Runs every HTTP check against the most recent hop in `requests`.
pub fn http_analysis(requests: &[RequestEntry], control: &ControlResponse) -> HttpAnalysisResult {
    let Some(response) = requests.first().map(|entry| &entry.response) else {
        return HttpAnalysisResult::default();
    };
    let (body_length_match, body_proportion) = body_length_checks(response, control);
    let status_code_match = status_code_match(response, control);
    HttpAnalysisResult {
        body_length_match,
        body_proportion,
        status_code_match,
        headers_match: headers_match(response, control, status_code_match),
        title_match: title_match(response, control),
    }
}

fn body_length_checks(
    response: &HttpResponseRecord,
    control: &ControlResponse,
) -> (Option<bool>, f64) {
    let theirs = control.http_request.body_length;
    let ours = response.body_length;
    if theirs <= 0 || ours <= 0 || response.body_is_truncated {
        return (None, 0.0);
    }
    let proportion = ours.min(theirs) as f64 / ours.max(theirs) as f64;
    (Some(proportion >= BODY_PROPORTION_FACTOR), proportion)
}

fn status_code_match(response: &HttpResponseRecord, control: &ControlResponse) -> Option<bool> {
    let theirs = control.http_request.status_code;
    let ours = response.code;
    if theirs <= 0 || ours <= 0 {
        return None;
    }
    if theirs == ours {
        return Some(true);
    }
    // a failing control says nothing about the probe
    if theirs / 100 == 5 {
        return None;
    }
    Some(false)
}

fn headers_match(
    response: &HttpResponseRecord,
    control: &ControlResponse,
    status_code_match: Option<bool>,
) -> Option<bool> {
    if status_code_match != Some(true) {
        return None;
    }
    let ours: BTreeSet<String> = response.headers.keys().map(|k| k.to_ascii_lowercase()).collect();
    let theirs: BTreeSet<String> = control
        .http_request
        .headers
        .keys()
        .map(|k| k.to_ascii_lowercase())
        .collect();
    if ours == theirs {
        return Some(true);
    }
    let uncommon = |set: &BTreeSet<String>| -> BTreeSet<String> {
        set.iter()
            .filter(|name| !COMMON_HEADERS.contains(&name.as_str()))
            .cloned()
            .collect()
    };
    let ours = uncommon(&ours);
    let theirs = uncommon(&theirs);
    if ours.is_empty() && theirs.is_empty() {
        return Some(true);
    }
    Some(!ours.is_disjoint(&theirs))
}

fn title_match(response: &HttpResponseRecord, control: &ControlResponse) -> Option<bool> {
    let theirs = control.http_request.title.trim();
    if response.code <= 0
        || response.body_is_truncated
        || control.http_request.status_code <= 0
        || theirs.is_empty()
    {
        return None;
    }
    let ours = extract_title(&response.body)?;
    if ours.len() > MAX_TITLE_LENGTH {
        return None;
    }
    Some(title_words(&ours) == title_words(theirs))
}

/// Lowercased words of a title, ignoring order and words shorter than
/// [`MIN_TITLE_WORD_LENGTH`].
fn title_words(title: &str) -> BTreeSet<String> {
    title
        .split_whitespace()
        .filter(|word| word.chars().count() >= MIN_TITLE_WORD_LENGTH)
        .map(str::to_lowercase)
        .collect()
}
