//! CF-style time coordinate decoding: `"<unit> since <base>"`.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};

use super::grid::GridError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeUnits {
    pub seconds_per_unit: f64,
    pub base: DateTime<Utc>,
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
];

impl TimeUnits {
    /// Parses e.g. `"hours since 1950-01-01 00:00:00"` or
    /// `"seconds since 1970-01-01T00:00:00Z"`.
    pub fn parse(units: &str) -> Result<Self, GridError> {
        let bad = || GridError::BadTimeUnits(units.to_string());
        let lower = units.trim().to_lowercase();
        let (unit, base) = lower.split_once(" since ").ok_or_else(bad)?;

        let seconds_per_unit = match unit.trim() {
            "second" | "seconds" | "s" => 1.0,
            "minute" | "minutes" | "min" => 60.0,
            "hour" | "hours" | "h" => 3600.0,
            "day" | "days" | "d" => 86400.0,
            _ => return Err(bad()),
        };

        let base = base.trim();
        let base = base.strip_suffix("utc").unwrap_or(base).trim();
        let base = base.strip_suffix('z').unwrap_or(base).trim();
        let base = parse_base(base).ok_or_else(bad)?;

        Ok(Self { seconds_per_unit, base })
    }

    /// Converts an offset in these units to an instant, rounded to the
    /// nearest millisecond.
    pub fn to_datetime(&self, offset: f64) -> Option<DateTime<Utc>> {
        if !offset.is_finite() {
            return None;
        }
        let millis = (offset * self.seconds_per_unit * 1000.0).round();
        if millis.abs() > i64::MAX as f64 / 2.0 {
            return None;
        }
        self.base.checked_add_signed(Duration::milliseconds(millis as i64))
    }
}

fn parse_base(text: &str) -> Option<DateTime<Utc>> {
    // "t" from the lower-cased ISO separator
    let text = text.replacen('t', "T", 1);
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&text, fmt) {
            return Some(dt.and_utc());
        }
    }
    NaiveDate::parse_from_str(&text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_common_units() {
        let u = TimeUnits::parse("hours since 1950-01-01 00:00:00").unwrap();
        assert_eq!(u.seconds_per_unit, 3600.0);
        assert_eq!(u.base, Utc.with_ymd_and_hms(1950, 1, 1, 0, 0, 0).unwrap());

        let d = TimeUnits::parse("days since 2025-03-01").unwrap();
        assert_eq!(d.to_datetime(1.5), Some(Utc.with_ymd_and_hms(2025, 3, 2, 12, 0, 0).unwrap()));
    }

    #[test]
    fn test_parse_iso_and_utc_suffixes() {
        let a = TimeUnits::parse("seconds since 1970-01-01T00:00:00Z").unwrap();
        assert_eq!(a.base, Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(a.to_datetime(86400.0), Some(Utc.with_ymd_and_hms(1970, 1, 2, 0, 0, 0).unwrap()));

        let b = TimeUnits::parse("Minutes since 2024-06-01 12:30:00.0 UTC").unwrap();
        assert_eq!(b.seconds_per_unit, 60.0);
        assert_eq!(b.base, Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 0).unwrap());
    }

    #[test]
    fn test_rejects_unknown_units() {
        assert!(TimeUnits::parse("fortnights since 2024-01-01").is_err());
        assert!(TimeUnits::parse("hours after 2024-01-01").is_err());
        assert!(TimeUnits::parse("hours since yesterday").is_err());
    }

    #[test]
    fn test_non_finite_offset() {
        let u = TimeUnits::parse("hours since 2024-01-01").unwrap();
        assert_eq!(u.to_datetime(f64::NAN), None);
    }
}
