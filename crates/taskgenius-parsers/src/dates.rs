//! Date parsing and formatting helpers
//!
//! All instants are UTC milliseconds since the Unix epoch. Date-only values
//! resolve to midnight UTC.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

const DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y%m%dT%H%M%S",
];

/// Parse a date or date-time string
pub fn parse_date(input: &str) -> Option<i64> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc).timestamp_millis());
    }

    let naive = s.strip_suffix('Z').unwrap_or(s);
    for format in DATE_TIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, format) {
            return Some(Utc.from_utc_datetime(&dt).timestamp_millis());
        }
    }

    for format in ["%Y-%m-%d", "%Y%m%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return date
                .and_hms_opt(0, 0, 0)
                .map(|dt| Utc.from_utc_datetime(&dt).timestamp_millis());
        }
    }

    None
}

/// Format an instant as a `YYYY-MM-DD` day key
pub fn format_day(millis: i64) -> Option<String> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|dt| dt.format("%Y-%m-%d").to_string())
}

/// Current time in epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_date() {
        let ms = parse_date("2024-03-15").unwrap();
        assert_eq!(format_day(ms).unwrap(), "2024-03-15");
    }

    #[test]
    fn test_parse_date_time_variants() {
        let a = parse_date("2024-03-15 10:30").unwrap();
        let b = parse_date("2024-03-15T10:30").unwrap();
        let c = parse_date("20240315T103000Z").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_parse_compact_ics_date() {
        let ms = parse_date("20240101").unwrap();
        assert_eq!(format_day(ms).unwrap(), "2024-01-01");
    }

    #[test]
    fn test_parse_rfc3339_with_offset() {
        let ms = parse_date("2024-03-15T23:30:00-02:00").unwrap();
        assert_eq!(format_day(ms).unwrap(), "2024-03-16");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_date("").is_none());
        assert!(parse_date("tomorrow").is_none());
        assert!(parse_date("2024-13-45").is_none());
    }
}
