//! Validators for conditional requests: HTTP dates and entity tags.
//!
//! Cached content keeps its `Last-Modified` as a [`DateTime<Utc>`] and its
//! `ETag` unquoted; these helpers convert to and from the wire forms.

use chrono::{DateTime, SubsecRound, Utc};

/// IMF-fixdate layout (RFC 9110 §5.6.7).
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Formats a timestamp as an HTTP date.
///
/// ```
/// use artiproxy::http::conditional::format_http_date;
/// use chrono::{TimeZone, Utc};
///
/// let when = Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap();
/// assert_eq!(format_http_date(when), "Sun, 06 Nov 1994 08:49:37 GMT");
/// ```
pub fn format_http_date(when: DateTime<Utc>) -> String {
    when.format(HTTP_DATE_FORMAT).to_string()
}

/// Parses an HTTP date. Returns `None` for anything unparseable; callers treat
/// a bad date the same as an absent one.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

/// HTTP dates carry whole seconds, so comparisons drop the fraction first.
pub fn truncate_to_seconds(when: DateTime<Utc>) -> DateTime<Utc> {
    when.trunc_subsecs(0)
}

/// Strips the surrounding quotes from a strong entity tag.
///
/// Weak tags (`W/"..."`) are kept verbatim so they round-trip unchanged.
pub fn unquote_etag(value: &str) -> String {
    let value = value.trim();
    match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(inner) => inner.to_owned(),
        None => value.to_owned(),
    }
}

/// Produces the wire form of a stored entity tag.
pub fn quote_etag(etag: &str) -> String {
    if etag.starts_with("W/") || etag.starts_with('"') {
        etag.to_owned()
    } else {
        format!("\"{etag}\"")
    }
}

/// Returns `true` when an `If-None-Match` header value matches `etag`.
pub fn if_none_match_matches(header: &str, etag: &str) -> bool {
    let header = header.trim();
    if header == "*" {
        return true;
    }
    let wanted = unquote_etag(etag.trim_start_matches("W/"));
    header
        .split(',')
        .map(|candidate| unquote_etag(candidate.trim().trim_start_matches("W/")))
        .any(|candidate| candidate == wanted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn http_date_roundtrip_drops_subseconds() {
        let when = Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 1).unwrap();
        let parsed = parse_http_date(&format_http_date(when)).unwrap();
        assert_eq!(parsed, when);
    }

    #[test]
    fn garbage_date_is_none() {
        assert!(parse_http_date("yesterday").is_none());
    }

    #[test]
    fn etag_quoting() {
        assert_eq!(unquote_etag("\"abc\""), "abc");
        assert_eq!(unquote_etag("W/\"abc\""), "W/\"abc\"");
        assert_eq!(quote_etag("abc"), "\"abc\"");
        assert_eq!(quote_etag("W/\"abc\""), "W/\"abc\"");
    }

    #[test]
    fn if_none_match_lists_and_wildcards() {
        assert!(if_none_match_matches("\"x\", \"abc\"", "abc"));
        assert!(if_none_match_matches("W/\"abc\"", "abc"));
        assert!(if_none_match_matches("*", "anything"));
        assert!(!if_none_match_matches("\"nope\"", "abc"));
    }
}
