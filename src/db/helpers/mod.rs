use std::convert::TryFrom;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

/// Fixed millisecond precision keeps TEXT ordering identical to time ordering.
pub fn format_datetime(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Drops sub-millisecond precision so a returned row equals its stored form.
pub fn stored_precision(value: DateTime<Utc>) -> DateTime<Utc> {
    value.trunc_subsecs(3)
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn ensure_seconds(value: f64, field: &str) -> Result<f64> {
    if !value.is_finite() || value < 0.0 {
        bail!("{field} must be a non-negative number of seconds, got {value}");
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formatted_timestamps_sort_chronologically() {
        let earlier = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let later = earlier + chrono::Duration::milliseconds(5);

        assert!(format_datetime(&earlier) < format_datetime(&later));
        assert_eq!(format_datetime(&earlier), "2024-03-01T08:00:00.000Z");
    }

    #[test]
    fn stored_precision_survives_a_round_trip() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
            + chrono::Duration::nanoseconds(12_345_678);
        let stored = stored_precision(ts);
        assert_eq!(parse_datetime(&format_datetime(&ts), "timestamp").unwrap(), stored);
    }

    #[test]
    fn parses_what_it_formats() {
        let ts = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap();
        let parsed = parse_datetime(&format_datetime(&ts), "timestamp").unwrap();
        assert_eq!(parsed, ts);
    }

    #[test]
    fn rejects_negative_and_non_finite_seconds() {
        assert!(ensure_seconds(-0.1, "duration_seconds").is_err());
        assert!(ensure_seconds(f64::NAN, "duration_seconds").is_err());
        assert_eq!(ensure_seconds(0.0, "duration_seconds").unwrap(), 0.0);
    }

    #[test]
    fn negative_integers_are_rejected() {
        assert!(to_u64(-1, "breathing_duration_seconds").is_err());
        assert_eq!(to_u64(65, "breathing_duration_seconds").unwrap(), 65);
    }
}
