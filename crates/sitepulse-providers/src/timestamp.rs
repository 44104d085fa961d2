//! Lenient vendor timestamp parsing.
//!
//! The two vendors disagree on timestamp shape (ISO8601 with fractional
//! seconds vs. without, plus bare dates in breakdown rows). A single
//! malformed timestamp must not invalidate an otherwise-valid payload, so
//! the last resort is `now`, not an error.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

const FORMATS: &[&str] = &[
    // Fractional seconds first.
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%Y-%m-%dT%H:%M:%S%.f",
    // Then non-fractional variants.
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Parse a vendor timestamp, falling back to `now` when nothing matches.
pub fn parse_timestamp(raw: &str, now: NaiveDateTime) -> NaiveDateTime {
    let trimmed = raw.trim();

    // RFC3339 with an explicit offset covers Umami cloud responses.
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return parsed.naive_utc();
    }
    for format in FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return parsed;
        }
    }
    // Plausible timeseries rows carry bare dates at day granularity.
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return midnight;
        }
    }
    now
}
