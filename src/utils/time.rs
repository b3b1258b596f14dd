//! Time utilities: epoch-millisecond storage, timestamp parsing, calendar days.

use crate::errors::{AppError, AppResult};
use chrono::{DateTime, FixedOffset, NaiveDate, Offset, TimeZone, Utc};

/// Timestamps are stored as INTEGER milliseconds so SQLite orders them natively.
pub fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub fn from_millis(ms: i64) -> AppResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| AppError::InvalidTimestamp(ms.to_string()))
}

/// Same as [`from_millis`] but usable inside rusqlite row mappers.
pub fn millis_column(ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    from_millis(ms).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Integer, Box::new(e))
    })
}

/// Accepts RFC 3339 (`2025-03-01T08:00:00Z`) or `YYYY-MM-DD HH:MM:SS` (UTC).
pub fn parse_timestamp(s: &str) -> AppResult<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|_| AppError::InvalidTimestamp(s.to_string()))
}

/// CLI `--at` values: parsed when given, current time otherwise.
pub fn timestamp_or_now(s: Option<&str>) -> AppResult<DateTime<Utc>> {
    s.map_or_else(|| Ok(Utc::now()), parse_timestamp)
}

pub fn offset(minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(minutes * 60).unwrap_or_else(|| Utc.fix())
}

/// Local calendar day of `ts` for a device/office at `offset`.
pub fn local_day(ts: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    ts.with_timezone(&offset).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_day_crosses_midnight_with_offset() {
        let ts = parse_timestamp("2025-03-01T20:30:00Z").unwrap();
        assert_eq!(local_day(ts, offset(0)).to_string(), "2025-03-01");
        assert_eq!(local_day(ts, offset(330)).to_string(), "2025-03-02");
    }

    #[test]
    fn parses_both_formats() {
        let a = parse_timestamp("2025-03-01T08:00:00Z").unwrap();
        let b = parse_timestamp("2025-03-01 08:00:00").unwrap();
        assert_eq!(a, b);
        assert_eq!(from_millis(to_millis(a)).unwrap(), a);
        assert!(parse_timestamp("yesterday").is_err());
    }
}
