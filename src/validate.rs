//! Identifier rules shared by property keys, event names and distinct ids.

use crate::error::{Error, Result};

/// Longest accepted property key or event name, in characters.
pub const MAX_KEY_LEN: usize = 100;

/// Longest accepted distinct id or original id, in characters.
pub const MAX_ID_LEN: usize = 255;

/// Longest accepted string property value (and list element), in bytes.
pub const MAX_STRING_LEN: usize = 8192;

/// Names the ingestion server reserves for record-level fields.
const RESERVED_KEYS: &[&str] = &[
    "distinct_id",
    "original_id",
    "time",
    "properties",
    "id",
    "first_id",
    "second_id",
    "users",
    "events",
    "event",
    "user_id",
    "date",
    "datetime",
];

/// Returns `None` if `name` is a valid identifier, otherwise the reason.
///
/// `allow_dollar` permits a single leading `$`, used for built-in events and
/// SDK-inserted properties.
fn identifier_problem(name: &str, allow_dollar: bool) -> Option<&'static str> {
    if name.is_empty() {
        return Some("must not be empty");
    }
    if name.chars().count() > MAX_KEY_LEN {
        return Some("longer than 100 characters");
    }

    let body = match name.strip_prefix('$') {
        Some(_) if !allow_dollar => return Some("the '$' prefix is reserved"),
        Some(rest) => rest,
        None => name,
    };

    let mut chars = body.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return Some("must start with a letter or underscore"),
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Some("may only contain letters, digits and underscores");
    }

    if RESERVED_KEYS.iter().any(|r| r.eq_ignore_ascii_case(name)) {
        return Some("is a reserved name");
    }
    None
}

/// Validate a user-supplied property key.
pub(crate) fn check_key(key: &str) -> Result<()> {
    match identifier_problem(key, false) {
        None => Ok(()),
        Some(reason) => Err(Error::InvalidKey {
            key: key.to_string(),
            reason,
        }),
    }
}

/// Validate an event name. `builtin` events may carry the `$` prefix.
pub(crate) fn check_event_name(name: &str, builtin: bool) -> Result<()> {
    match identifier_problem(name, builtin) {
        None => Ok(()),
        Some(reason) => Err(Error::InvalidEvent(format!(
            "event name {name:?} {reason}"
        ))),
    }
}

/// Validate a distinct id or original id.
pub(crate) fn check_id(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidEvent(format!("{field} must not be empty")));
    }
    if value.chars().count() > MAX_ID_LEN {
        return Err(Error::InvalidEvent(format!(
            "{field} is longer than {MAX_ID_LEN} characters"
        )));
    }
    Ok(())
}
