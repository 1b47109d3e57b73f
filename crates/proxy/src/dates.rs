//! HTTP date parsing, per
//! [RFC 7231 Section 7.1.1.1](https://tools.ietf.org/html/rfc7231#section-7.1.1.1).
//!
//! Not on the proxy's hot path — the core relays `Date` headers verbatim —
//! but persistence sinks want real timestamps out of the snapshots they
//! store.

use chrono::{DateTime, NaiveDateTime, Utc};

// Per RFC 7231, receivers MUST accept dates in all three formats:
// 1. IMF-fixdate (e.g. Sun, 06 Nov 1994 08:49:37 GMT)
// 2. RFC 850     (e.g. Sunday, 06-Nov-94 08:49:37 GMT)
// 3. asctime()   (e.g. Sun Nov  6 08:49:37 1994)
const IMF_FIXDATE: &str = "%a, %d %b %Y %H:%M:%S GMT";
const RFC_850: &str = "%A, %d-%b-%y %H:%M:%S GMT";
const ASCTIME: &str = "%a %b %e %H:%M:%S %Y";

/// Parses an HTTP date in any of the three RFC 7231 formats.
///
/// All three formats denote UTC. Returns `None` when `text` matches none
/// of them.
pub fn parse_http_date(text: &str) -> Option<DateTime<Utc>> {
    for format in [IMF_FIXDATE, RFC_850, ASCTIME] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            return Some(parsed.and_utc());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{Datelike, Timelike};

    #[test]
    fn parses_imf_fixdate() {
        let parsed = parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT").unwrap();
        assert_eq!((parsed.year(), parsed.month(), parsed.day()), (1994, 11, 6));
        assert_eq!((parsed.hour(), parsed.minute(), parsed.second()), (8, 49, 37));
    }

    #[test]
    fn parses_rfc_850_date() {
        let parsed = parse_http_date("Sunday, 06-Nov-94 08:49:37 GMT").unwrap();
        assert_eq!((parsed.year(), parsed.month(), parsed.day()), (1994, 11, 6));
    }

    #[test]
    fn parses_asctime_date() {
        let parsed = parse_http_date("Sun Nov  6 08:49:37 1994").unwrap();
        assert_eq!((parsed.year(), parsed.month(), parsed.day()), (1994, 11, 6));
        assert_eq!(parsed.hour(), 8);
    }

    #[test]
    fn all_formats_agree() {
        let a = parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT").unwrap();
        let b = parse_http_date("Sunday, 06-Nov-94 08:49:37 GMT").unwrap();
        let c = parse_http_date("Sun Nov  6 08:49:37 1994").unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn rejects_non_dates() {
        assert!(parse_http_date("ceci n'est pas un date").is_none());
        assert!(parse_http_date("").is_none());
    }

    #[test]
    fn rejects_inconsistent_weekday() {
        // 6 Nov 1994 was a Sunday
        assert!(parse_http_date("Mon, 06 Nov 1994 08:49:37 GMT").is_none());
    }
}
