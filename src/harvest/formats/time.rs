//! Timestamp recognition shared by the built-in handlers.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// One way of writing a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeFormat {
    Rfc3339,
    DateTime(&'static str),
    Date(&'static str),
}

/// Candidate formats in the order they are tried.
pub const FORMATS: &[TimeFormat] = &[
    TimeFormat::Rfc3339,
    TimeFormat::DateTime("%Y-%m-%dT%H:%M:%S%.f"),
    TimeFormat::DateTime("%Y-%m-%d %H:%M:%S%.f"),
    TimeFormat::DateTime("%Y-%m-%dT%H:%M"),
    TimeFormat::DateTime("%Y-%m-%d %H:%M"),
    TimeFormat::DateTime("%Y/%m/%d %H:%M:%S"),
    TimeFormat::DateTime("%d.%m.%Y %H:%M:%S"),
    TimeFormat::Date("%Y-%m-%d"),
    TimeFormat::Date("%Y/%m/%d"),
    TimeFormat::Date("%d.%m.%Y"),
    TimeFormat::Date("%d/%m/%Y"),
    TimeFormat::Date("%m/%d/%Y"),
];

impl TimeFormat {
    pub fn parse(&self, value: &str) -> Option<DateTime<Utc>> {
        let value = value.trim();
        match self {
            TimeFormat::Rfc3339 => DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            TimeFormat::DateTime(fmt) => NaiveDateTime::parse_from_str(value, fmt)
                .ok()
                .map(|t| Utc.from_utc_datetime(&t)),
            TimeFormat::Date(fmt) => NaiveDate::parse_from_str(value, fmt)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|t| Utc.from_utc_datetime(&t)),
        }
    }
}

/// Parses `value` with the first format that accepts it.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    FORMATS.iter().find_map(|f| f.parse(value))
}

/// First format that parses every value of the sample.
///
/// Returns `None` for an empty sample.
pub fn detect_format<'a, I>(sample: I) -> Option<TimeFormat>
where
    I: IntoIterator<Item = &'a str>,
{
    let sample: Vec<&str> = sample.into_iter().collect();
    if sample.is_empty() {
        return None;
    }
    FORMATS
        .iter()
        .copied()
        .find(|f| sample.iter().all(|v| f.parse(v).is_some()))
}
