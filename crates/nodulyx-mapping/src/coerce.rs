//! Type coercion for mapped values.
//!
//! Conversion failure never raises out of the engine: the caller degrades to
//! the mapping's default value when one exists, else tags the field
//! `Invalid(rawText)` and logs it.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use nodulyx_common::ScalarValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Integer,
    Float,
    Boolean,
    Date,
    DateTime,
    Text,
}

#[derive(Debug, Error)]
#[error("cannot coerce '{raw}' to {target:?}")]
pub struct CoercionError {
    pub raw: String,
    pub target: DataType,
}

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%Y%m%d"];
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Coerce raw text to the declared type.
pub fn coerce(raw: &str, dtype: DataType) -> Result<ScalarValue, CoercionError> {
    let trimmed = raw.trim();
    let fail = || CoercionError {
        raw: raw.to_string(),
        target: dtype,
    };

    match dtype {
        DataType::Text => Ok(ScalarValue::Text(trimmed.to_string())),
        DataType::Integer => {
            if let Ok(v) = trimmed.parse::<i64>() {
                return Ok(ScalarValue::Int(v));
            }
            // Accept an integral float rendering ("4.0") but not a lossy one.
            match trimmed.parse::<f64>() {
                Ok(f) if f.fract() == 0.0 && f.is_finite() => Ok(ScalarValue::Int(f as i64)),
                _ => Err(fail()),
            }
        }
        DataType::Float => trimmed
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(ScalarValue::Float)
            .ok_or_else(fail),
        DataType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(ScalarValue::Bool(true)),
            "false" | "no" | "0" => Ok(ScalarValue::Bool(false)),
            _ => Err(fail()),
        },
        DataType::Date => {
            for fmt in DATE_FORMATS {
                if let Ok(d) = NaiveDate::parse_from_str(trimmed, fmt) {
                    return Ok(ScalarValue::Date(d));
                }
            }
            Err(fail())
        }
        DataType::DateTime => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
                return Ok(ScalarValue::DateTime(dt.with_timezone(&Utc)));
            }
            for fmt in DATETIME_FORMATS {
                if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
                    return Ok(ScalarValue::DateTime(Utc.from_utc_datetime(&dt)));
                }
            }
            Err(fail())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_coercion() {
        assert_eq!(coerce(" 4 ", DataType::Integer).unwrap(), ScalarValue::Int(4));
        assert_eq!(coerce("4.0", DataType::Integer).unwrap(), ScalarValue::Int(4));
        assert!(coerce("4.5", DataType::Integer).is_err());
        assert!(coerce("four", DataType::Integer).is_err());
    }

    #[test]
    fn test_boolean_coercion() {
        assert_eq!(coerce("Yes", DataType::Boolean).unwrap(), ScalarValue::Bool(true));
        assert_eq!(coerce("0", DataType::Boolean).unwrap(), ScalarValue::Bool(false));
        assert!(coerce("maybe", DataType::Boolean).is_err());
    }

    #[test]
    fn test_date_formats() {
        let expected = ScalarValue::Date(NaiveDate::from_ymd_opt(2001, 3, 14).unwrap());
        assert_eq!(coerce("2001-03-14", DataType::Date).unwrap(), expected);
        assert_eq!(coerce("03/14/2001", DataType::Date).unwrap(), expected);
        assert_eq!(coerce("20010314", DataType::Date).unwrap(), expected);
        assert!(coerce("14th March", DataType::Date).is_err());
    }

    #[test]
    fn test_datetime_rfc3339() {
        let v = coerce("2001-03-14T09:30:00Z", DataType::DateTime).unwrap();
        assert!(matches!(v, ScalarValue::DateTime(_)));
    }

    #[test]
    fn test_text_never_fails() {
        assert_eq!(
            coerce("  anything  ", DataType::Text).unwrap(),
            ScalarValue::Text("anything".to_string())
        );
    }
}
