//! Local-first telemetry client.
//!
//! Events and profile updates are validated into [`EventRecord`]s, staged in
//! a bounded, crash-safe [`StagingQueue`] on local disk, and delivered in
//! batches by a [`Flusher`] through a caller-supplied [`Transport`]. The
//! [`Sdk`] ties these together behind an explicit init/shutdown lifecycle.
//!
//! Delivery is at-least-once: a crash between a successful upload and the
//! journal write that removes the batch resends it after restart.

mod clock;
mod config;
mod error;
mod flush;
mod journal;
mod properties;
mod queue;
mod record;
mod sdk;
mod transport;
mod validate;
mod value;

pub use clock::{Clock, RandomSource, SystemClock, ThreadRandom};
pub use config::{DEFAULT_FLUSH_PART_SIZE, DEFAULT_MAX_STAGING_RECORD_COUNT, SdkBuilder, SdkConfig};
pub use error::{Error, Result};
pub use flush::Flusher;
pub use properties::PropertySet;
pub use queue::{AppendResult, RecordId, RecoveryReport, StagedRecord, StagingQueue};
pub use record::{ActionType, EventRecord, EventRecordBuilder};
pub use sdk::{SIGNUP_EVENT, Sdk};
pub use transport::{Transport, TransportError};
pub use validate::{MAX_ID_LEN, MAX_KEY_LEN, MAX_STRING_LEN};
pub use value::{DATETIME_FORMAT, PropertyValue, format_datetime, parse_datetime};

/// Value of the `$lib` property and `lib.$lib` field.
pub const SDK_NAME: &str = "rust";

/// Value of the `$lib_version` property and `lib.$lib_version` field.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
