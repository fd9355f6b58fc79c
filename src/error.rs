use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the staging and delivery pipeline.
///
/// Validation errors (`InvalidKey`, `InvalidNesting`, `InvalidValue`,
/// `InvalidEvent`) are reported before anything is queued. `Storage` and
/// `Delivery` leave the queue in a consistent state: the record is either
/// staged or it is not.
#[derive(Debug, Error)]
pub enum Error {
    /// A property name failed validation.
    #[error("invalid property key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    /// An object property contains another object.
    #[error("property {key:?} nests an object inside an object")]
    InvalidNesting { key: String },

    /// A property value is out of range or malformed.
    #[error("invalid value for property {key:?}: {reason}")]
    InvalidValue { key: String, reason: String },

    /// An event record failed validation.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// Initialization parameters were rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reading or writing the staging journal failed.
    #[error("staging storage failure at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A record or property set could not be rendered as JSON.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The transport reported a failed delivery.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// The SDK or queue was used after shutdown.
    #[error("sdk has been shut down")]
    ShutDown,
}

impl Error {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Storage {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid_value(key: &str, reason: impl Into<String>) -> Self {
        Error::InvalidValue {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
