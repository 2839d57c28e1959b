//! Cell-level type coercion shared by the CSV and JSON batch paths.
//!
//! Every function takes the raw textual cell and returns either the typed value or a
//! message describing why it could not be coerced; callers attach row/column context.

use chrono::{DateTime, DurationRound, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use serde_json::Value;

/// Cell spellings read as missing values.
const NULL_MARKERS: &[&str] = &["", "nan", "null", "none", "na", "n/a", "<na>", "nat"];

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

pub fn is_null(raw: &str) -> bool {
    let trimmed = raw.trim();
    NULL_MARKERS
        .iter()
        .any(|marker| trimmed.eq_ignore_ascii_case(marker))
}

/// Parse an integer, accepting integral decimals such as `3.0`.
pub fn parse_integer(raw: &str) -> Result<i64, String> {
    let trimmed = raw.trim();
    if let Ok(value) = trimmed.parse::<i64>() {
        return Ok(value);
    }

    match trimmed.parse::<f64>() {
        Ok(value)
            if value.is_finite()
                && value.fract() == 0.0
                && value >= i64::MIN as f64
                && value <= i64::MAX as f64 =>
        {
            Ok(value as i64)
        }
        _ => Err(format!("invalid literal for integer: '{}'", trimmed)),
    }
}

/// Required integer: a missing value is an error.
pub fn required_integer(raw: &str) -> Result<i64, String> {
    if is_null(raw) {
        return Err("cannot convert missing value to integer".to_string());
    }
    parse_integer(raw)
}

/// Nullable integer: a missing value becomes `None` rather than zero or an error.
pub fn nullable_integer(raw: &str) -> Result<Option<i64>, String> {
    if is_null(raw) {
        return Ok(None);
    }
    parse_integer(raw).map(Some)
}

pub fn text(raw: &str) -> String {
    raw.trim().to_string()
}

/// Parse a timestamp into UTC. Values without an offset are read as UTC; a missing value
/// becomes `None`.
pub fn timestamp(raw: &str) -> Result<Option<DateTime<Utc>>, String> {
    if is_null(raw) {
        return Ok(None);
    }
    let trimmed = raw.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(Some(parsed.with_timezone(&Utc)));
    }
    if let Ok(parsed) = DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Ok(Some(parsed.with_timezone(&Utc)));
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(Some(parsed.and_utc()));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        && let Some(midnight) = date.and_hms_opt(0, 0, 0)
    {
        return Ok(Some(midnight.and_utc()));
    }

    Err(format!("unknown datetime format: '{}'", trimmed))
}

/// Round to millisecond precision.
pub fn round_to_millis(value: DateTime<Utc>) -> Result<DateTime<Utc>, String> {
    value
        .duration_round(TimeDelta::milliseconds(1))
        .map_err(|e| format!("cannot round '{}' to milliseconds: {}", value, e))
}

/// Textual view of a JSON scalar; `None` for JSON null.
pub fn json_cell(value: &Value) -> Result<Option<String>, String> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(_) | Value::Array(_) | Value::Object(_) => {
            Err(format!("expected a scalar value, got {}", value))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn integers_accept_integral_decimals_only() {
        assert_eq!(parse_integer(" 42 "), Ok(42));
        assert_eq!(parse_integer("3.0"), Ok(3));
        assert_eq!(parse_integer("-7"), Ok(-7));
        assert!(parse_integer("3.5").is_err());
        assert!(parse_integer("abc").is_err());
        assert!(parse_integer("inf").is_err());
    }

    #[test]
    fn required_integer_rejects_blank() {
        assert!(required_integer("").is_err());
        assert!(required_integer("NaN").is_err());
        assert_eq!(required_integer("1"), Ok(1));
    }

    #[test]
    fn nullable_integer_keeps_blank_as_null() {
        assert_eq!(nullable_integer(""), Ok(None));
        assert_eq!(nullable_integer("  "), Ok(None));
        assert_eq!(nullable_integer("NULL"), Ok(None));
        assert_eq!(nullable_integer("2.0"), Ok(Some(2)));
        assert!(nullable_integer("two").is_err());
    }

    #[test]
    fn timestamps_in_common_layouts() {
        let expected = Utc.with_ymd_and_hms(2021, 11, 7, 2, 48, 42).unwrap();
        for raw in [
            "2021-11-07T02:48:42Z",
            "2021-11-07T02:48:42+00:00",
            "2021-11-07 02:48:42",
            "2021-11-07T02:48:42",
            "2021-11-06T23:48:42-03:00",
        ] {
            assert_eq!(timestamp(raw), Ok(Some(expected)), "layout {raw}");
        }

        assert_eq!(
            timestamp("2021-11-07"),
            Ok(Some(Utc.with_ymd_and_hms(2021, 11, 7, 0, 0, 0).unwrap()))
        );
        assert_eq!(timestamp(""), Ok(None));
        assert!(timestamp("yesterday").is_err());
    }

    #[test]
    fn rounding_drops_sub_millisecond_digits() {
        let value = timestamp("2021-11-07T02:48:42.123456Z").unwrap().unwrap();
        let rounded = round_to_millis(value).unwrap();
        assert_eq!(rounded.nanosecond(), 123_000_000);

        let value = timestamp("2021-11-07T02:48:42.123999Z").unwrap().unwrap();
        let rounded = round_to_millis(value).unwrap();
        assert_eq!(rounded.nanosecond(), 124_000_000);
    }

    #[test]
    fn json_cells() {
        assert_eq!(json_cell(&serde_json::json!(5)), Ok(Some("5".to_string())));
        assert_eq!(json_cell(&serde_json::json!("5")), Ok(Some("5".to_string())));
        assert_eq!(json_cell(&Value::Null), Ok(None));
        assert!(json_cell(&serde_json::json!([1])).is_err());
        assert!(json_cell(&serde_json::json!(true)).is_err());
    }
}
