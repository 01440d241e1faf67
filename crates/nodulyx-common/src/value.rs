//! Tagged scalar values for canonical documents.
//!
//! The three-way absent/not-applicable/invalid distinction replaces the
//! string sentinels ("#N/A", "MISSING") that downstream quality reports key
//! on. A field is never a bare nullable scalar.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A concrete typed scalar extracted from a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ScalarValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    Text(String),
}

impl ScalarValue {
    pub fn as_text(&self) -> String {
        match self {
            ScalarValue::Int(v)      => v.to_string(),
            ScalarValue::Float(v)    => v.to_string(),
            ScalarValue::Bool(v)     => v.to_string(),
            ScalarValue::Date(v)     => v.format("%Y-%m-%d").to_string(),
            ScalarValue::DateTime(v) => v.to_rfc3339(),
            ScalarValue::Text(v)     => v.clone(),
        }
    }
}

impl std::fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_text())
    }
}

/// A field value plus its extraction status.
///
/// - `Present`: the source carried the field and it parsed.
/// - `ExpectedButMissing`: the active case expected the field, the source
///   did not carry it.
/// - `NotApplicable`: the source did not carry the field and the case did
///   not expect it.
/// - `Invalid`: the source carried text that failed type coercion and the
///   mapping had no default; raw text is kept for quality reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum TaggedValue {
    Present(ScalarValue),
    ExpectedButMissing,
    NotApplicable,
    Invalid(String),
}

impl TaggedValue {
    pub fn is_present(&self) -> bool {
        matches!(self, TaggedValue::Present(_))
    }

    /// The inner scalar, if present.
    pub fn scalar(&self) -> Option<&ScalarValue> {
        match self {
            TaggedValue::Present(v) => Some(v),
            _ => None,
        }
    }

    /// Human-readable rendering used by the flat projection.
    pub fn as_text(&self) -> String {
        match self {
            TaggedValue::Present(v)         => v.as_text(),
            TaggedValue::ExpectedButMissing => "MISSING".to_string(),
            TaggedValue::NotApplicable      => "#N/A".to_string(),
            TaggedValue::Invalid(raw)       => format!("INVALID({raw})"),
        }
    }
}
