//! Normalization of upstream timestamps into UTC instants.
//!
//! Upstream APIs report the start of a run in different shapes: the job API uses fractional
//! epoch seconds, the workflow console uses ISO-8601 strings that may or may not carry an offset.
//! Everything is converted to [`DateTime<Utc>`] right where it is deserialized, so no code past
//! the ingestion boundary ever deals with a timestamp that lacks a zone.
//!
//! Offset-less strings are interpreted as UTC.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::de::{self, Deserializer, Visitor};

/// Formats accepted for timestamps without an explicit offset.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

/// An error returned when an upstream timestamp cannot be normalized.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TimestampError {
    /// The string is neither RFC 3339 nor a supported offset-less format.
    #[error("invalid timestamp '{0}'")]
    Invalid(String),
    /// The numeric epoch value is not finite or not representable.
    #[error("epoch timestamp {0} is out of range")]
    OutOfRange(f64),
}

/// Parses a timestamp string into a UTC instant.
///
/// Strings with an offset are converted to UTC. Strings without an offset are taken as UTC.
///
/// # Example
///
/// ```
/// use pipewatch_common::time::parse_timestamp;
///
/// let aware = parse_timestamp("2024-05-01T12:00:00+02:00").unwrap();
/// let naive = parse_timestamp("2024-05-01T10:00:00").unwrap();
/// assert_eq!(aware, naive);
/// ```
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, TimestampError> {
    let value = value.trim();

    if let Ok(aware) = DateTime::parse_from_rfc3339(value) {
        return Ok(aware.with_timezone(&Utc));
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| TimestampError::Invalid(value.to_owned()))
}

/// Converts fractional seconds since the UNIX epoch into a UTC instant.
///
/// Precision is kept to the millisecond.
pub fn from_epoch_secs(secs: f64) -> Result<DateTime<Utc>, TimestampError> {
    if !secs.is_finite() {
        return Err(TimestampError::OutOfRange(secs));
    }

    let millis = (secs * 1000.0).round();
    if millis < i64::MIN as f64 || millis > i64::MAX as f64 {
        return Err(TimestampError::OutOfRange(secs));
    }

    DateTime::from_timestamp_millis(millis as i64).ok_or(TimestampError::OutOfRange(secs))
}

/// Formats an instant as RFC 3339 in UTC with a `Z` suffix and second precision.
///
/// This is the format used in query parameters sent upstream.
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

struct TimestampVisitor;

impl<'de> Visitor<'de> for TimestampVisitor {
    type Value = DateTime<Utc>;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("an ISO-8601 timestamp or seconds since the UNIX epoch")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        DateTime::from_timestamp(v, 0)
            .ok_or_else(|| E::custom(TimestampError::OutOfRange(v as f64)))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        let secs = i64::try_from(v).map_err(|_| E::custom(TimestampError::OutOfRange(v as f64)))?;
        self.visit_i64(secs)
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        from_epoch_secs(v).map_err(E::custom)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        parse_timestamp(v).map_err(E::custom)
    }
}

struct OptionalTimestampVisitor;

impl<'de> Visitor<'de> for OptionalTimestampVisitor {
    type Value = Option<DateTime<Utc>>;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("an optional timestamp")
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(TimestampVisitor).map(Some)
    }
}

/// Deserializes a required upstream timestamp, for use with `#[serde(deserialize_with)]`.
pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(TimestampVisitor)
}

/// Deserializes an optional upstream timestamp, for use with `#[serde(deserialize_with)]`.
///
/// `null` and missing values (with `#[serde(default)]`) become `None`.
pub fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_option(OptionalTimestampVisitor)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use similar_asserts::assert_eq;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct Run {
        #[serde(default, deserialize_with = "deserialize_opt")]
        started_on: Option<DateTime<Utc>>,
    }

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_parse_offset_is_normalized() {
        let parsed = parse_timestamp("2024-03-10T09:30:00+10:00").unwrap();
        assert_eq!(parsed, utc("2024-03-09T23:30:00Z"));
    }

    #[test]
    fn test_parse_naive_is_utc() {
        let parsed = parse_timestamp("2024-03-10T09:30:00.250").unwrap();
        assert_eq!(parsed, utc("2024-03-10T09:30:00.250Z"));

        let parsed = parse_timestamp("2024-03-10 09:30:00").unwrap();
        assert_eq!(parsed, utc("2024-03-10T09:30:00Z"));
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(
            parse_timestamp("yesterday"),
            Err(TimestampError::Invalid("yesterday".to_owned()))
        );
    }

    #[test]
    fn test_epoch_fractional() {
        let parsed = from_epoch_secs(1_700_000_000.5).unwrap();
        assert_eq!(parsed, utc("2023-11-14T22:13:20.500Z"));
    }

    #[test]
    fn test_epoch_not_finite() {
        assert!(from_epoch_secs(f64::NAN).is_err());
        assert!(from_epoch_secs(f64::INFINITY).is_err());
    }

    #[test]
    fn test_format() {
        assert_eq!(
            format_timestamp(utc("2024-03-10T09:30:12.999Z")),
            "2024-03-10T09:30:12Z"
        );
    }

    #[test]
    fn test_deserialize_shapes() {
        let runs: Vec<Run> = serde_json::from_str(
            r#"[
                {"started_on": 1700000000},
                {"started_on": 1700000000.0},
                {"started_on": "2023-11-14T22:13:20+00:00"},
                {"started_on": "2023-11-14T22:13:20"},
                {"started_on": null},
                {}
            ]"#,
        )
        .unwrap();

        let expected = Some(utc("2023-11-14T22:13:20Z"));
        assert_eq!(runs[0].started_on, expected);
        assert_eq!(runs[1].started_on, expected);
        assert_eq!(runs[2].started_on, expected);
        assert_eq!(runs[3].started_on, expected);
        assert_eq!(runs[4].started_on, None);
        assert_eq!(runs[5].started_on, None);
    }

    #[test]
    fn test_deserialize_garbage_fails() {
        let result: Result<Run, _> = serde_json::from_str(r#"{"started_on": "soon"}"#);
        assert!(result.is_err());
    }
}
