use crate::error::{Error, Result};
use crate::validate::{self, MAX_STRING_LEN};
use crate::value::{self, PropertyValue};
use serde::ser::{Serialize, Serializer};
use std::collections::BTreeMap;

/// A set of named, typed properties attached to an event or profile update.
///
/// Keys are kept sorted, so two sets with the same content always serialize
/// to byte-identical JSON. Setters validate the key and the value before
/// touching the set; on error the set is left exactly as it was.
///
/// Object values may nest one level deep: an object property cannot itself
/// hold an object.
///
/// # Examples
///
/// ```
/// use eventstage::PropertySet;
///
/// let mut props = PropertySet::new();
/// props
///     .set_string("plan", "pro")?
///     .set_int("seats", 12)?
///     .set_bool("trial", false)?;
///
/// assert_eq!(props.to_json()?, r#"{"plan":"pro","seats":12,"trial":false}"#);
/// # Ok::<(), eventstage::Error>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertySet {
    entries: BTreeMap<String, PropertyValue>,
}

impl PropertySet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `name`, overwriting any previous value.
    ///
    /// # Errors
    ///
    /// `InvalidKey` if `name` is not a valid property identifier,
    /// `InvalidValue` if the value is out of range, `InvalidNesting` if an
    /// object value itself contains an object.
    pub fn set(&mut self, name: &str, value: impl Into<PropertyValue>) -> Result<&mut Self> {
        validate::check_key(name)?;
        let value = value.into();
        check_value(name, &value)?;
        self.entries.insert(name.to_string(), value);
        Ok(self)
    }

    /// Store a floating-point number. Must be finite.
    pub fn set_number(&mut self, name: &str, value: f64) -> Result<&mut Self> {
        self.set(name, PropertyValue::Number(value))
    }

    /// Store an integer.
    pub fn set_int(&mut self, name: &str, value: i64) -> Result<&mut Self> {
        self.set(name, PropertyValue::Int(value))
    }

    /// Store a string of at most 8192 bytes.
    pub fn set_string(&mut self, name: &str, value: impl Into<String>) -> Result<&mut Self> {
        self.set(name, PropertyValue::String(value.into()))
    }

    /// Store a boolean.
    pub fn set_bool(&mut self, name: &str, value: bool) -> Result<&mut Self> {
        self.set(name, PropertyValue::Bool(value))
    }

    /// Store a list of strings.
    pub fn set_list<I, S>(&mut self, name: &str, values: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let list = values.into_iter().map(Into::into).collect();
        self.set(name, PropertyValue::List(list))
    }

    /// Store a datetime given as epoch seconds plus milliseconds (`0..=999`).
    pub fn set_datetime(&mut self, name: &str, seconds: i64, millis: u32) -> Result<&mut Self> {
        self.set(name, PropertyValue::DateTime { seconds, millis })
    }

    /// Store a datetime given as `"YYYY-MM-DD HH:MM:SS.mmm"` (UTC).
    pub fn set_datetime_str(&mut self, name: &str, text: &str) -> Result<&mut Self> {
        validate::check_key(name)?;
        let (seconds, millis) = value::parse_datetime(text).ok_or_else(|| {
            Error::invalid_value(name, format!("{text:?} is not YYYY-MM-DD HH:MM:SS.mmm"))
        })?;
        self.set(name, PropertyValue::DateTime { seconds, millis })
    }

    /// Store a nested object.
    ///
    /// # Errors
    ///
    /// `InvalidNesting` if `nested` contains an object property.
    pub fn set_object(&mut self, name: &str, nested: &PropertySet) -> Result<&mut Self> {
        self.set(name, PropertyValue::Object(nested.clone()))
    }

    /// Overlay `other` onto this set. Keys present in both take `other`'s value.
    pub fn merge(&mut self, other: &PropertySet) {
        for (key, value) in &other.entries {
            self.entries.insert(key.clone(), value.clone());
        }
    }

    /// Remove every property.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Remove one property, returning its value if it was present.
    pub fn remove(&mut self, name: &str) -> Option<PropertyValue> {
        self.entries.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.entries.get(name)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(name, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Render the set as a canonical JSON object.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Render the set as a [`serde_json::Value`].
    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Insert a property the SDK itself owns (`$lib`, `$is_login_id`, ...),
    /// bypassing key validation.
    pub(crate) fn insert_builtin(&mut self, name: &str, value: impl Into<PropertyValue>) {
        self.entries.insert(name.to_string(), value.into());
    }

    fn contains_object(&self) -> bool {
        self.entries.values().any(PropertyValue::is_object)
    }
}

fn check_value(key: &str, value: &PropertyValue) -> Result<()> {
    match value {
        PropertyValue::Number(n) if !n.is_finite() => {
            Err(Error::invalid_value(key, "number must be finite"))
        }
        PropertyValue::String(s) if s.len() > MAX_STRING_LEN => Err(Error::invalid_value(
            key,
            format!("string longer than {MAX_STRING_LEN} bytes"),
        )),
        PropertyValue::List(items) if items.iter().any(|s| s.len() > MAX_STRING_LEN) => {
            Err(Error::invalid_value(
                key,
                format!("list element longer than {MAX_STRING_LEN} bytes"),
            ))
        }
        PropertyValue::DateTime { seconds, millis } => {
            match value::format_datetime(*seconds, *millis) {
                Some(_) => Ok(()),
                None => Err(Error::invalid_value(key, "datetime out of range")),
            }
        }
        PropertyValue::Object(nested) if nested.contains_object() => {
            Err(Error::InvalidNesting {
                key: key.to_string(),
            })
        }
        _ => Ok(()),
    }
}

impl Serialize for PropertySet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(self.entries.iter().filter(|(_, v)| !v.is_unset()))
    }
}

impl<'a> IntoIterator for &'a PropertySet {
    type Item = (&'a String, &'a PropertyValue);
    type IntoIter = std::collections::btree_map::Iter<'a, String, PropertyValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
