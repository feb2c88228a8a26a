//! Extracts a joinable meeting URL from a calendar event.
//!
//! Sources are tried in a fixed priority order and never combined: the
//! dedicated conferencing link, then conference entry points, then a URL
//! scan of the free-form location field.

use std::sync::OnceLock;

use regex::Regex;

use crate::google::calendar::Event;

/// The single best meeting URL for `event`, if it has one.
pub fn meeting_url(event: &Event) -> Option<String> {
    // 1. The dedicated conferencing link (Google Meet) wins outright.
    if let Some(link) = event.hangout_link.as_deref() {
        if !link.is_empty() {
            return Some(link.to_string());
        }
    }

    // 2. First "video" conference entry point, in given order. Covers Meet,
    //    Zoom-via-GCal, Teams, etc.
    for entry in &event.entry_points {
        if entry.entry_point_type.as_deref() == Some("video") {
            if let Some(uri) = entry.uri.as_deref() {
                if !uri.is_empty() {
                    return Some(uri.to_string());
                }
            }
        }
    }

    // 3. Fall back to scanning the location field.
    if let Some(location) = event.location.as_deref() {
        if let Some(url) = find_url(location) {
            return Some(url);
        }
    }

    None
}

/// First http(s) URL in `text`, terminated at whitespace or `, ; > " ' )`.
fn find_url(text: &str) -> Option<String> {
    static URL_RE: OnceLock<Regex> = OnceLock::new();
    let re = URL_RE
        .get_or_init(|| Regex::new(r#"(?i)https?://[^\s,;>"')]+"#).expect("URL pattern compiles"));
    re.find(text).map(|m| m.as_str().to_string())
}
