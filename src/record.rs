use crate::error::{Error, Result};
use crate::properties::PropertySet;
use crate::validate;
use crate::value::PropertyValue;
use crate::{SDK_NAME, SDK_VERSION};
use serde::Serialize;

/// What a record asks the ingestion server to do.
///
/// Serialized as the record's `"type"` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// A behavioral event.
    Track,
    /// A `$SignUp` event binding an anonymous id to a login id.
    TrackSignup,
    /// Overwrite profile properties.
    ProfileSet,
    /// Set profile properties only where no value exists yet.
    ProfileSetOnce,
    /// Add to numeric profile properties.
    ProfileIncrement,
    /// Append strings to list profile properties.
    ProfileAppend,
    /// Remove profile properties.
    ProfileUnset,
    /// Delete the whole profile.
    ProfileDelete,
}

impl ActionType {
    /// The wire name (`"track"`, `"profile_set"`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::Track => "track",
            ActionType::TrackSignup => "track_signup",
            ActionType::ProfileSet => "profile_set",
            ActionType::ProfileSetOnce => "profile_set_once",
            ActionType::ProfileIncrement => "profile_increment",
            ActionType::ProfileAppend => "profile_append",
            ActionType::ProfileUnset => "profile_unset",
            ActionType::ProfileDelete => "profile_delete",
        }
    }

    /// Returns `true` for event-producing actions, which carry a name.
    pub fn is_track(self) -> bool {
        matches!(self, ActionType::Track | ActionType::TrackSignup)
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct LibInfo {
    #[serde(rename = "$lib")]
    lib: &'static str,
    #[serde(rename = "$lib_version")]
    lib_version: &'static str,
    #[serde(rename = "$lib_method")]
    lib_method: &'static str,
}

const LIB_INFO: LibInfo = LibInfo {
    lib: SDK_NAME,
    lib_version: SDK_VERSION,
    lib_method: "code",
};

/// An immutable, validated event or profile mutation.
///
/// Built with [`EventRecord::builder`]; all validation happens in
/// [`EventRecordBuilder::build`]. Serializes to the ingestion wire format:
///
/// ```text
/// {"_track_id":42,"distinct_id":"u1","event":"ViewItem","lib":{...},
///  "properties":{"$lib":"rust",...},"time":1536300622567,"type":"track"}
/// ```
///
/// Field order is fixed and property keys are sorted, so equal records
/// serialize to equal bytes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    #[serde(rename = "_track_id")]
    track_id: u32,
    distinct_id: String,
    #[serde(rename = "event", skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    lib: LibInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    original_id: Option<String>,
    properties: PropertySet,
    #[serde(rename = "time")]
    created_at: i64,
    #[serde(rename = "type")]
    action: ActionType,
}

impl EventRecord {
    /// Start building a record of the given action for `distinct_id`.
    ///
    /// # Examples
    ///
    /// ```
    /// use eventstage::{ActionType, EventRecord, PropertySet};
    ///
    /// let mut props = PropertySet::new();
    /// props.set_string("sku", "A-100")?;
    ///
    /// let record = EventRecord::builder(ActionType::Track, "user_42")
    ///     .name("ViewItem")
    ///     .properties(props)
    ///     .created_at(1_536_300_622_567)
    ///     .build()?;
    ///
    /// assert_eq!(record.name(), Some("ViewItem"));
    /// assert_eq!(record.distinct_id(), "user_42");
    /// # Ok::<(), eventstage::Error>(())
    /// ```
    pub fn builder(action: ActionType, distinct_id: impl Into<String>) -> EventRecordBuilder {
        EventRecordBuilder {
            action,
            distinct_id: distinct_id.into(),
            name: None,
            original_id: None,
            properties: PropertySet::new(),
            created_at: 0,
            track_id: 0,
            login_id: None,
            builtin: false,
        }
    }

    pub fn action(&self) -> ActionType {
        self.action
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn distinct_id(&self) -> &str {
        &self.distinct_id
    }

    pub fn original_id(&self) -> Option<&str> {
        self.original_id.as_deref()
    }

    pub fn properties(&self) -> &PropertySet {
        &self.properties
    }

    /// Creation time in milliseconds since the Unix epoch.
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn track_id(&self) -> u32 {
        self.track_id
    }

    /// Serialize to the single-line JSON wire format.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Builder for [`EventRecord`].
#[derive(Debug, Clone)]
pub struct EventRecordBuilder {
    action: ActionType,
    distinct_id: String,
    name: Option<String>,
    original_id: Option<String>,
    properties: PropertySet,
    created_at: i64,
    track_id: u32,
    login_id: Option<bool>,
    builtin: bool,
}

impl EventRecordBuilder {
    /// Event name. Required for track actions, rejected for profile actions.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The previous distinct id, for `track_signup` records.
    pub fn original_id(mut self, original_id: impl Into<String>) -> Self {
        self.original_id = Some(original_id.into());
        self
    }

    pub fn properties(mut self, properties: PropertySet) -> Self {
        self.properties = properties;
        self
    }

    /// Creation time in milliseconds since the Unix epoch.
    pub fn created_at(mut self, millis: i64) -> Self {
        self.created_at = millis;
        self
    }

    pub fn track_id(mut self, track_id: u32) -> Self {
        self.track_id = track_id;
        self
    }

    /// Record whether `distinct_id` is a login id (`$is_login_id`).
    pub fn login_id(mut self, is_login_id: bool) -> Self {
        self.login_id = Some(is_login_id);
        self
    }

    /// Allow a `$`-prefixed event name.
    pub(crate) fn builtin(mut self) -> Self {
        self.builtin = true;
        self
    }

    /// Validate and produce the record.
    ///
    /// # Errors
    ///
    /// `InvalidEvent` if an id is empty or too long, the name is missing,
    /// malformed or not allowed for this action, a signup lacks its
    /// original id, or property values do not fit the action (increments
    /// must be numeric, appends must be lists).
    pub fn build(self) -> Result<EventRecord> {
        let EventRecordBuilder {
            action,
            distinct_id,
            name,
            original_id,
            mut properties,
            created_at,
            track_id,
            login_id,
            builtin,
        } = self;

        validate::check_id("distinct_id", &distinct_id)?;
        if let Some(original) = &original_id {
            validate::check_id("original_id", original)?;
        }

        match (&name, action.is_track()) {
            (Some(name), true) => validate::check_event_name(name, builtin)?,
            (None, true) => {
                return Err(Error::InvalidEvent(format!(
                    "{action} records require an event name"
                )));
            }
            (Some(name), false) => {
                return Err(Error::InvalidEvent(format!(
                    "{action} records take no event name, got {name:?}"
                )));
            }
            (None, false) => {}
        }

        if action == ActionType::TrackSignup && original_id.is_none() {
            return Err(Error::InvalidEvent(
                "track_signup records require an original_id".to_string(),
            ));
        }

        check_property_types(action, &properties)?;

        if action.is_track() {
            properties.insert_builtin("$lib", SDK_NAME);
            properties.insert_builtin("$lib_version", SDK_VERSION);
        }
        if let Some(is_login_id) = login_id {
            properties.insert_builtin("$is_login_id", is_login_id);
        }

        Ok(EventRecord {
            track_id,
            distinct_id,
            name,
            lib: LIB_INFO,
            original_id,
            properties,
            created_at,
            action,
        })
    }
}

fn check_property_types(action: ActionType, properties: &PropertySet) -> Result<()> {
    let expected: fn(&PropertyValue) -> bool = match action {
        ActionType::ProfileIncrement => PropertyValue::is_numeric,
        ActionType::ProfileAppend => |v| matches!(v, PropertyValue::List(_)),
        _ => return Ok(()),
    };

    let user_props = properties.iter().filter(|(k, _)| !k.starts_with('$'));
    for (key, value) in user_props {
        if !expected(value) {
            let wanted = match action {
                ActionType::ProfileIncrement => "a number",
                _ => "a list",
            };
            return Err(Error::InvalidEvent(format!(
                "{action} property {key:?} must be {wanted}"
            )));
        }
    }
    Ok(())
}
