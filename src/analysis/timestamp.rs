//! Timestamp parsing for trace logs.
//!
//! Traces carry ISO-8601 instants with 3, 6 or 9 fractional digits and either
//! a `Z` marker or a numeric offset. All of them are normalised to UTC and
//! truncated (never rounded) to whole microseconds.

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};

use super::types::TraceTime;

/// Parse a trace timestamp, e.g. "2024-12-09T20:03:09.030144354+00:00".
pub fn parse_timestamp(s: &str) -> Option<TraceTime> {
    let s = s.trim();

    let parsed = DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        // Offset-less timestamps are taken as UTC
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })?;

    Some(truncate_to_micros(parsed))
}

fn truncate_to_micros(t: TraceTime) -> TraceTime {
    let nanos = t.nanosecond();
    t.with_nanosecond(nanos - nanos % 1_000).unwrap_or(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fractional_precisions_agree() {
        let millis = parse_timestamp("2024-01-01T00:00:00.500Z").unwrap();
        let micros = parse_timestamp("2024-01-01T00:00:00.500000Z").unwrap();
        let nanos = parse_timestamp("2024-01-01T00:00:00.500000000Z").unwrap();
        assert_eq!(millis, micros);
        assert_eq!(micros, nanos);
    }

    #[test]
    fn test_offset_and_marker_agree() {
        let zulu = parse_timestamp("2024-01-01T00:00:00.500Z").unwrap();
        let offset = parse_timestamp("2024-01-01T00:00:00.500+00:00").unwrap();
        assert_eq!(zulu, offset);

        let shifted = parse_timestamp("2024-01-01T02:00:00.500+02:00").unwrap();
        assert_eq!(zulu, shifted);
    }

    #[test]
    fn test_truncates_below_microsecond() {
        let t = parse_timestamp("2024-12-09T20:03:09.030144999+00:00").unwrap();
        assert_eq!(t.nanosecond(), 30_144_000);
    }

    #[test]
    fn test_without_fraction_or_offset() {
        let plain = parse_timestamp("2024-01-01T00:00:01Z").unwrap();
        let naive = parse_timestamp("2024-01-01T00:00:01").unwrap();
        assert_eq!(plain, naive);
        assert_eq!(plain.timestamp(), 1_704_067_201);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("not a time").is_none());
        assert!(parse_timestamp("2024-13-01T00:00:00Z").is_none());
    }
}
