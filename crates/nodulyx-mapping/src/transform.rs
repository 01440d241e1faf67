//! Value transformation pipeline.
//!
//! An ordered list of pure value-to-value functions applied strictly after
//! type coercion. An unrecognized transformation name is a logged no-op so
//! newer profiles keep working against older engines.

use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

use nodulyx_common::ScalarValue;

use crate::coerce::{coerce, DataType};

fn numeric_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?\d+(?:\.\d+)?").unwrap())
}

/// Apply one named transformation.
pub fn apply_transformation(value: ScalarValue, name: &str) -> ScalarValue {
    match name {
        "trim" => match value {
            ScalarValue::Text(t) => ScalarValue::Text(t.trim().to_string()),
            other => other,
        },
        "casefold" | "lowercase" => match value {
            ScalarValue::Text(t) => ScalarValue::Text(t.to_lowercase()),
            other => other,
        },
        "extract_numeric" => match value {
            ScalarValue::Text(ref t) => match numeric_re().find(t) {
                Some(m) if m.as_str().contains('.') => m
                    .as_str()
                    .parse::<f64>()
                    .map(ScalarValue::Float)
                    .unwrap_or(value),
                Some(m) => m
                    .as_str()
                    .parse::<i64>()
                    .map(ScalarValue::Int)
                    .unwrap_or(value),
                None => value,
            },
            other => other,
        },
        "parse_date" => match value {
            ScalarValue::Text(ref t) => coerce(t, DataType::Date).unwrap_or(value),
            other => other,
        },
        unknown => {
            debug!(transformation = unknown, "Unrecognized transformation, passing value through");
            value
        }
    }
}

/// Apply an ordered pipeline of transformations.
pub fn apply_pipeline(mut value: ScalarValue, names: &[String]) -> ScalarValue {
    for name in names {
        value = apply_transformation(value, name);
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> ScalarValue {
        ScalarValue::Text(s.to_string())
    }

    #[test]
    fn test_trim_and_casefold() {
        let out = apply_pipeline(
            text("  Well-Defined  "),
            &["trim".to_string(), "casefold".to_string()],
        );
        assert_eq!(out, text("well-defined"));
    }

    #[test]
    fn test_extract_numeric_integer_and_float() {
        assert_eq!(
            apply_transformation(text("confidence level 4"), "extract_numeric"),
            ScalarValue::Int(4)
        );
        assert_eq!(
            apply_transformation(text("z = -125.75 mm"), "extract_numeric"),
            ScalarValue::Float(-125.75)
        );
    }

    #[test]
    fn test_extract_numeric_without_digits_is_noop() {
        assert_eq!(
            apply_transformation(text("none"), "extract_numeric"),
            text("none")
        );
    }

    #[test]
    fn test_parse_date() {
        let out = apply_transformation(text("2001-03-14"), "parse_date");
        assert!(matches!(out, ScalarValue::Date(_)));
    }

    #[test]
    fn test_unknown_transformation_is_noop() {
        assert_eq!(apply_transformation(text("x"), "sparkle"), text("x"));
    }

    #[test]
    fn test_non_text_values_pass_through() {
        assert_eq!(
            apply_transformation(ScalarValue::Int(3), "trim"),
            ScalarValue::Int(3)
        );
    }
}
