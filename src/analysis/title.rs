use std::sync::LazyLock;

use regex::Regex;

/// Titles longer than this are not compared.
pub const MAX_TITLE_LENGTH: usize = 1024;

static TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid title regex"));

/// Returns the trimmed text of the first `<title>` element, if any.
pub fn extract_title(body: &str) -> Option<String> {
    let captures = TITLE.captures(body)?;
    let title = captures.get(1)?.as_str().trim();
    if title.is_empty() {
        return None;
    }
    Some(title.to_string())
}
