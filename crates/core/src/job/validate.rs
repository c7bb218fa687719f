//! Source URL validation.

use once_cell::sync::Lazy;
use regex_lite::Regex;

/// `watch?...v=<id>` on any host, with `v` anywhere in the query.
static WATCH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^https?://[A-Za-z0-9.-]+(?::\d+)?/watch\?(?:[^#\s]*&)?v=([A-Za-z0-9_-]{11})(?:[&#][^\s]*)?$",
    )
    .expect("watch pattern is valid")
});

/// Short links and embed-style paths: `/<id>`, `/embed/<id>`, `/shorts/<id>`, `/v/<id>`.
static PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^https?://[A-Za-z0-9.-]+(?::\d+)?/(?:embed/|shorts/|v/)?([A-Za-z0-9_-]{11})(?:[?&#][^\s]*)?$",
    )
    .expect("path pattern is valid")
});

/// Extract the 11-character video identifier from a source URL.
pub fn extract_video_id(url: &str) -> Option<String> {
    let url = url.trim();
    [&*WATCH_PATTERN, &*PATH_PATTERN]
        .into_iter()
        .find_map(|pattern| pattern.captures(url))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Whether the URL matches one of the accepted source patterns.
pub fn is_valid_source_url(url: &str) -> bool {
    extract_video_id(url).is_some()
}
