use crate::clock::{Clock, RandomSource, SystemClock, ThreadRandom};
use crate::error::{Error, Result};
use crate::sdk::Sdk;
use crate::transport::Transport;
use crate::validate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Default capacity of the staging queue.
pub const DEFAULT_MAX_STAGING_RECORD_COUNT: usize = 10_000;

/// Default number of records sent per transport call.
pub const DEFAULT_FLUSH_PART_SIZE: usize = 50;

fn default_max_staging_record_count() -> usize {
    DEFAULT_MAX_STAGING_RECORD_COUNT
}

fn default_flush_part_size() -> usize {
    DEFAULT_FLUSH_PART_SIZE
}

/// Settings for an [`Sdk`] instance.
///
/// Deserializable so a host can keep it in whatever config file it already
/// uses; missing optional fields take their defaults.
///
/// ```
/// use eventstage::SdkConfig;
///
/// let config: SdkConfig = serde_json::from_str(r#"{
///     "storage_path": "/var/lib/app/staging.jsonl",
///     "server_url": "https://ingest.example.com/sa?project=default",
///     "distinct_id": "device-7f3a"
/// }"#).unwrap();
///
/// assert_eq!(config.max_staging_record_count, 10_000);
/// assert!(config.flush_interval().is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdkConfig {
    /// Journal file for staged records.
    pub storage_path: PathBuf,
    /// Ingestion endpoint handed to the transport.
    pub server_url: String,
    /// Initial distinct id.
    pub distinct_id: String,
    /// Whether `distinct_id` is a login id.
    #[serde(default)]
    pub is_login_id: bool,
    /// Queue capacity; the oldest record is evicted beyond it.
    #[serde(default = "default_max_staging_record_count")]
    pub max_staging_record_count: usize,
    /// Records per transport call for [`Sdk::flush`] and background flushes.
    #[serde(default = "default_flush_part_size")]
    pub flush_part_size: usize,
    /// Background flush period. `None` disables the background worker.
    #[serde(default)]
    pub flush_interval_ms: Option<u64>,
}

impl SdkConfig {
    pub fn new(
        storage_path: impl AsRef<Path>,
        server_url: impl Into<String>,
        distinct_id: impl Into<String>,
    ) -> Self {
        SdkConfig {
            storage_path: storage_path.as_ref().to_path_buf(),
            server_url: server_url.into(),
            distinct_id: distinct_id.into(),
            is_login_id: false,
            max_staging_record_count: DEFAULT_MAX_STAGING_RECORD_COUNT,
            flush_part_size: DEFAULT_FLUSH_PART_SIZE,
            flush_interval_ms: None,
        }
    }

    /// Background flush period, if enabled.
    pub fn flush_interval(&self) -> Option<Duration> {
        self.flush_interval_ms.map(Duration::from_millis)
    }

    /// Check every field without touching the filesystem.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` describing the first offending field.
    pub fn validate(&self) -> Result<()> {
        let url = self.server_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::InvalidConfig(format!(
                "server_url must be an http(s) URL, got {:?}",
                self.server_url
            )));
        }
        validate::check_id("distinct_id", &self.distinct_id)
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        if self.max_staging_record_count == 0 {
            return Err(Error::InvalidConfig(
                "max_staging_record_count must be greater than zero".to_string(),
            ));
        }
        if self.flush_part_size == 0 {
            return Err(Error::InvalidConfig(
                "flush_part_size must be greater than zero".to_string(),
            ));
        }
        if self.flush_interval_ms == Some(0) {
            return Err(Error::InvalidConfig(
                "flush_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for an [`Sdk`], created by [`Sdk::builder`].
pub struct SdkBuilder {
    config: SdkConfig,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
}

impl SdkBuilder {
    pub(crate) fn new(config: SdkConfig) -> Self {
        SdkBuilder {
            config,
            clock: Arc::new(SystemClock),
            random: Arc::new(ThreadRandom),
        }
    }

    /// Mark the initial distinct id as a login id.
    pub fn login_id(mut self, is_login_id: bool) -> Self {
        self.config.is_login_id = is_login_id;
        self
    }

    pub fn max_staging_record_count(mut self, count: usize) -> Self {
        self.config.max_staging_record_count = count;
        self
    }

    pub fn flush_part_size(mut self, size: usize) -> Self {
        self.config.flush_part_size = size;
        self
    }

    /// Enable the background flush worker with the given period.
    ///
    /// The period has millisecond granularity; anything shorter than 1 ms
    /// is rejected at init as a zero interval.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.config.flush_interval_ms =
            Some(u64::try_from(interval.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Replace the wall clock used to timestamp records.
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Replace the source of `_track_id` values.
    pub fn random_source(mut self, random: impl RandomSource + 'static) -> Self {
        self.random = Arc::new(random);
        self
    }

    /// Open the staging queue and start the SDK.
    pub fn init(self, transport: impl Transport + 'static) -> Result<Sdk> {
        Sdk::start(self.config, Arc::new(transport), self.clock, self.random)
    }

    /// Like [`init`](Self::init), for a transport that is already shared.
    pub fn init_shared(self, transport: Arc<dyn Transport>) -> Result<Sdk> {
        Sdk::start(self.config, transport, self.clock, self.random)
    }
}

impl std::fmt::Debug for SdkBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdkBuilder")
            .field("config", &self.config)
            .finish()
    }
}
