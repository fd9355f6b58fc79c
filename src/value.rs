use crate::properties::PropertySet;
use chrono::{DateTime, NaiveDateTime};
use serde::ser::{Serialize, Serializer};

/// Wire format of datetime properties, always rendered in UTC.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// The value of a single property.
///
/// Serializes to plain JSON: numbers as numbers, lists as arrays of strings,
/// datetimes as `"YYYY-MM-DD HH:MM:SS.mmm"` strings, objects as JSON objects.
/// `Unset` marks an absent value and is skipped when its enclosing
/// [`PropertySet`] is serialized.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PropertyValue {
    Number(f64),
    Int(i64),
    String(String),
    List(Vec<String>),
    DateTime { seconds: i64, millis: u32 },
    Bool(bool),
    Object(PropertySet),
    #[default]
    Unset,
}

impl PropertyValue {
    /// Returns `true` for `Number` and `Int`.
    pub fn is_numeric(&self) -> bool {
        matches!(self, PropertyValue::Number(_) | PropertyValue::Int(_))
    }

    /// Returns `true` for `Object`.
    pub fn is_object(&self) -> bool {
        matches!(self, PropertyValue::Object(_))
    }

    /// Returns `true` for `Unset`.
    pub fn is_unset(&self) -> bool {
        matches!(self, PropertyValue::Unset)
    }
}

/// Render epoch seconds + milliseconds as `YYYY-MM-DD HH:MM:SS.mmm` (UTC).
///
/// Returns `None` if the instant is out of range or `millis > 999`.
pub fn format_datetime(seconds: i64, millis: u32) -> Option<String> {
    if millis > 999 {
        return None;
    }
    let dt = DateTime::from_timestamp(seconds, millis * 1_000_000)?;
    Some(dt.format(DATETIME_FORMAT).to_string())
}

/// Parse `YYYY-MM-DD HH:MM:SS.mmm` (UTC) into epoch seconds + milliseconds.
///
/// Every field is zero-padded to its full width and exactly three
/// fractional digits are required; no sign or surrounding whitespace.
pub fn parse_datetime(text: &str) -> Option<(i64, u32)> {
    let bytes = text.as_bytes();
    if bytes.len() != 23 {
        return None;
    }
    let layout_ok = bytes.iter().enumerate().all(|(i, &b)| match i {
        4 | 7 => b == b'-',
        10 => b == b' ',
        13 | 16 => b == b':',
        19 => b == b'.',
        _ => b.is_ascii_digit(),
    });
    if !layout_ok {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(text, DATETIME_FORMAT).ok()?;
    let utc = naive.and_utc();
    Some((utc.timestamp(), utc.timestamp_subsec_millis()))
}

impl Serialize for PropertyValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PropertyValue::Number(n) => serializer.serialize_f64(*n),
            PropertyValue::Int(i) => serializer.serialize_i64(*i),
            PropertyValue::String(s) => serializer.serialize_str(s),
            PropertyValue::List(items) => serializer.collect_seq(items),
            PropertyValue::DateTime { seconds, millis } => {
                match format_datetime(*seconds, *millis) {
                    Some(text) => serializer.serialize_str(&text),
                    None => Err(serde::ser::Error::custom("datetime out of range")),
                }
            }
            PropertyValue::Bool(b) => serializer.serialize_bool(*b),
            PropertyValue::Object(set) => set.serialize(serializer),
            PropertyValue::Unset => serializer.serialize_none(),
        }
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Number(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Int(i64::from(value))
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(value: Vec<String>) -> Self {
        PropertyValue::List(value)
    }
}
