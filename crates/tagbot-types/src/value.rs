//! Tag values.
//!
//! Tags are dynamically typed. [`TagValue`] closes the set of shapes a
//! tag may hold so that every consumer matches exhaustively instead of
//! probing an untyped JSON blob.
//!
//! # Wire Format
//!
//! `TagValue` serializes as plain JSON. A string starting with
//! [`FORMULA_PREFIX`] round-trips as [`TagValue::Formula`]:
//!
//! ```
//! use tagbot_types::TagValue;
//!
//! let v: TagValue = serde_json::from_str("\"=1 + 1\"").unwrap();
//! assert_eq!(v, TagValue::Formula("1 + 1".into()));
//! assert_eq!(serde_json::to_string(&v).unwrap(), "\"=1 + 1\"");
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Sentinel prefix marking a formula tag.
pub const FORMULA_PREFIX: char = '=';

/// Tag name → value map of a bot. Ordered so iteration is deterministic.
pub type Tags = BTreeMap<String, TagValue>;

/// Value held by a tag.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "JsonValue", into = "JsonValue")]
pub enum TagValue {
    /// Absent / deleted. In an update patch this deletes the tag.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Number (all numbers are `f64`, as in the script runtime).
    Number(f64),
    /// Plain string (never starts with [`FORMULA_PREFIX`]).
    String(String),
    /// JSON array or object.
    Object(JsonValue),
    /// Formula source without the prefix, evaluated lazily on read.
    Formula(String),
}

impl TagValue {
    /// Converts a JSON value, recognizing formula strings.
    #[must_use]
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => Self::Number(n.as_f64().unwrap_or(0.0)),
            JsonValue::String(s) => match s.strip_prefix(FORMULA_PREFIX) {
                Some(text) if !text.is_empty() => Self::Formula(text.to_string()),
                _ => Self::String(s),
            },
            other => Self::Object(other),
        }
    }

    /// Converts to JSON. Formulas come back with their prefix, whole
    /// numbers as JSON integers.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(b) => JsonValue::Bool(*b),
            Self::Number(n) => number_to_json(*n),
            Self::String(s) => JsonValue::String(s.clone()),
            Self::Object(v) => v.clone(),
            Self::Formula(text) => JsonValue::String(format!("{FORMULA_PREFIX}{text}")),
        }
    }

    /// Returns `true` for [`TagValue::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns `true` for [`TagValue::Formula`].
    #[must_use]
    pub fn is_formula(&self) -> bool {
        matches!(self, Self::Formula(_))
    }

    /// Returns the string content of a plain string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the boolean content of a boolean value.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the numeric content of a number value.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Interprets the value as a boolean flag.
    ///
    /// `false` and the string `"false"` are false, `true` and `"true"`
    /// are true; anything else yields `default`.
    #[must_use]
    pub fn as_flag(&self, default: bool) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::String(s) if s == "true" => true,
            Self::String(s) if s == "false" => false,
            _ => default,
        }
    }

    /// Renders the value the way a tag reference reads it: strings
    /// verbatim, numbers without a trailing `.0`, everything else as
    /// JSON.
    #[must_use]
    pub fn to_display_string(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            other => match other.to_json() {
                JsonValue::String(s) => s,
                json => json.to_string(),
            },
        }
    }
}

/// Converts a number to JSON. Whole numbers below 2^53 become integers, so
/// `2 * 2.0` compares equal to `4`; non-finite numbers become `null`.
#[must_use]
pub fn number_to_json(n: f64) -> JsonValue {
    const MAX_SAFE: f64 = 9_007_199_254_740_992.0;
    if n.fract() == 0.0 && n.abs() < MAX_SAFE {
        JsonValue::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(JsonValue::Null, JsonValue::Number)
    }
}

impl From<JsonValue> for TagValue {
    fn from(value: JsonValue) -> Self {
        Self::from_json(value)
    }
}

impl From<TagValue> for JsonValue {
    fn from(value: TagValue) -> Self {
        value.to_json()
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        Self::from_json(JsonValue::String(value.to_string()))
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        Self::from_json(JsonValue::String(value))
    }
}

impl From<bool> for TagValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for TagValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<i32> for TagValue {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}
