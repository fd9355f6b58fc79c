use crate::clock::{Clock, RandomSource};
use crate::config::{SdkBuilder, SdkConfig};
use crate::error::{Error, Result};
use crate::flush::Flusher;
use crate::properties::PropertySet;
use crate::queue::{AppendResult, StagingQueue};
use crate::record::{ActionType, EventRecord, EventRecordBuilder};
use crate::transport::Transport;
use crate::validate;
use crate::value::PropertyValue;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Event name of the record emitted by [`Sdk::login`].
pub const SIGNUP_EVENT: &str = "$SignUp";

struct Identity {
    distinct_id: String,
    is_login_id: bool,
}

/// State shared with the background worker.
struct Shared {
    flusher: Flusher,
    identity: RwLock<Identity>,
    super_properties: Mutex<PropertySet>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    storage_path: PathBuf,
    flush_part_size: usize,
    shut_down: AtomicBool,
}

enum Signal {
    Flush,
    Stop,
}

struct Worker {
    signal: Sender<Signal>,
    handle: JoinHandle<()>,
}

/// A telemetry client: tracks events and profile updates, stages them
/// durably, and flushes them through a [`Transport`].
///
/// `Sdk` is an ordinary owned value. It is `Send + Sync`, so share it by
/// reference or wrap it in an `Arc`; independent instances on different
/// storage paths can run side by side. [`shutdown`](Self::shutdown) (or
/// dropping the value) syncs the journal and releases it, after which every
/// call returns [`Error::ShutDown`].
///
/// # Examples
///
/// ```
/// use eventstage::{PropertySet, Sdk, TransportError};
///
/// # let dir = tempfile::tempdir().unwrap();
/// let upload = |_url: &str, batch: &[String]| -> Result<(), TransportError> {
///     assert!(!batch.is_empty());
///     Ok(())
/// };
/// let sdk = Sdk::builder(dir.path().join("staging.jsonl"), "https://ingest.example.com/sa", "device-1")
///     .max_staging_record_count(1_000)
///     .init(upload)?;
///
/// let mut props = PropertySet::new();
/// props.set_string("screen", "home")?;
/// sdk.track("AppViewScreen", &props)?;
///
/// assert_eq!(sdk.flush()?, 1);
/// sdk.shutdown()?;
/// # Ok::<(), eventstage::Error>(())
/// ```
pub struct Sdk {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl Sdk {
    /// Start configuring an SDK.
    pub fn builder(
        storage_path: impl AsRef<Path>,
        server_url: impl Into<String>,
        distinct_id: impl Into<String>,
    ) -> SdkBuilder {
        SdkBuilder::new(SdkConfig::new(storage_path, server_url, distinct_id))
    }

    /// Start configuring an SDK from an existing [`SdkConfig`].
    pub fn with_config(config: SdkConfig) -> SdkBuilder {
        SdkBuilder::new(config)
    }

    /// Initialize with the essential parameters and default providers.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for a bad URL, distinct id or zero capacity;
    /// `Storage` if `storage_path` cannot be opened for writing.
    pub fn init(
        storage_path: impl AsRef<Path>,
        server_url: impl Into<String>,
        distinct_id: impl Into<String>,
        is_login_id: bool,
        max_staging_record_count: usize,
        transport: impl Transport + 'static,
    ) -> Result<Sdk> {
        Sdk::builder(storage_path, server_url, distinct_id)
            .login_id(is_login_id)
            .max_staging_record_count(max_staging_record_count)
            .init(transport)
    }

    pub(crate) fn start(
        config: SdkConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
    ) -> Result<Sdk> {
        config.validate()?;

        let queue = StagingQueue::open(&config.storage_path, config.max_staging_record_count)?;
        let staged = queue.len();
        let flusher = Flusher::new(
            Arc::new(Mutex::new(queue)),
            transport,
            config.server_url.trim(),
        );

        let shared = Arc::new(Shared {
            flusher,
            identity: RwLock::new(Identity {
                distinct_id: config.distinct_id.clone(),
                is_login_id: config.is_login_id,
            }),
            super_properties: Mutex::new(PropertySet::new()),
            clock,
            random,
            storage_path: config.storage_path.clone(),
            flush_part_size: config.flush_part_size,
            shut_down: AtomicBool::new(false),
        });

        let worker = match config.flush_interval() {
            Some(interval) => Some(spawn_worker(shared.clone(), interval)?),
            None => None,
        };

        info!(
            "eventstage: initialized at {} with {staged} staged record(s)",
            config.storage_path.display()
        );
        Ok(Sdk {
            shared,
            worker: Mutex::new(worker),
        })
    }

    /// Record a behavioral event. Super properties are merged in; values in
    /// `properties` win on conflict.
    pub fn track(&self, event_name: &str, properties: &PropertySet) -> Result<()> {
        self.ensure_open()?;
        let builder = self
            .record(ActionType::Track)
            .name(event_name)
            .properties(self.event_properties(properties));
        self.stage(builder)
    }

    /// Record a behavioral event with no properties of its own.
    pub fn track_event(&self, event_name: &str) -> Result<()> {
        self.track(event_name, &PropertySet::new())
    }

    /// Record an installation event, typically on first launch.
    ///
    /// `event_name` may use the `$` prefix (e.g. `$AppInstall`). Besides the
    /// event, a `profile_set_once` record stores `$first_visit_time` and
    /// `properties` on the user profile.
    pub fn track_installation(&self, event_name: &str, properties: &PropertySet) -> Result<()> {
        self.ensure_open()?;
        let event = self
            .record(ActionType::Track)
            .name(event_name)
            .builtin()
            .properties(self.event_properties(properties));
        let now = self.shared.clock.now_millis();
        self.stage(event)?;

        let mut profile = properties.clone();
        profile.insert_builtin(
            "$first_visit_time",
            PropertyValue::DateTime {
                seconds: now.div_euclid(1000),
                millis: now.rem_euclid(1000) as u32,
            },
        );
        self.stage(self.record(ActionType::ProfileSetOnce).properties(profile))
    }

    /// Bind the current distinct id to `login_id`.
    ///
    /// Emits a `$SignUp` record carrying the previous id as `original_id`,
    /// then uses `login_id` for every later record. Logging in again with
    /// the current login id does nothing.
    pub fn login(&self, login_id: &str) -> Result<()> {
        self.ensure_open()?;
        let mut identity = self.shared.identity.write();
        if identity.distinct_id == login_id {
            identity.is_login_id = true;
            return Ok(());
        }

        let builder = EventRecord::builder(ActionType::TrackSignup, login_id)
            .name(SIGNUP_EVENT)
            .builtin()
            .original_id(identity.distinct_id.clone())
            .login_id(true)
            .properties(self.event_properties(&PropertySet::new()));
        self.stage(builder)?;

        debug!(
            "eventstage: logged in, distinct id {:?} -> {login_id:?}",
            identity.distinct_id
        );
        identity.distinct_id = login_id.to_string();
        identity.is_login_id = true;
        Ok(())
    }

    /// Replace the distinct id without emitting a record.
    pub fn identify(&self, distinct_id: &str, is_login_id: bool) -> Result<()> {
        self.ensure_open()?;
        validate::check_id("distinct_id", distinct_id)?;
        let mut identity = self.shared.identity.write();
        identity.distinct_id = distinct_id.to_string();
        identity.is_login_id = is_login_id;
        Ok(())
    }

    /// The distinct id new records are attributed to.
    pub fn distinct_id(&self) -> String {
        self.shared.identity.read().distinct_id.clone()
    }

    pub fn is_login_id(&self) -> bool {
        self.shared.identity.read().is_login_id
    }

    /// Overwrite profile properties.
    pub fn profile_set(&self, properties: &PropertySet) -> Result<()> {
        self.profile(ActionType::ProfileSet, properties)
    }

    /// Set profile properties that have no value yet.
    pub fn profile_set_once(&self, properties: &PropertySet) -> Result<()> {
        self.profile(ActionType::ProfileSetOnce, properties)
    }

    /// Add to numeric profile properties. Every value must be a number.
    pub fn profile_increment(&self, properties: &PropertySet) -> Result<()> {
        self.profile(ActionType::ProfileIncrement, properties)
    }

    /// Append to list profile properties. Every value must be a list.
    pub fn profile_append(&self, properties: &PropertySet) -> Result<()> {
        self.profile(ActionType::ProfileAppend, properties)
    }

    /// Remove the named profile properties.
    pub fn profile_unset(&self, names: &[&str]) -> Result<()> {
        let mut properties = PropertySet::new();
        for name in names {
            properties.set_bool(name, true)?;
        }
        self.profile(ActionType::ProfileUnset, &properties)
    }

    /// Delete the current user's profile.
    pub fn profile_delete(&self) -> Result<()> {
        self.profile(ActionType::ProfileDelete, &PropertySet::new())
    }

    /// Merge `properties` into the super properties attached to every
    /// tracked event.
    pub fn register_super_properties(&self, properties: &PropertySet) -> Result<()> {
        self.ensure_open()?;
        self.shared.super_properties.lock().merge(properties);
        Ok(())
    }

    /// Remove every super property.
    pub fn clear_super_properties(&self) -> Result<()> {
        self.ensure_open()?;
        self.shared.super_properties.lock().clear();
        Ok(())
    }

    /// A copy of the current super properties.
    pub fn super_properties(&self) -> PropertySet {
        self.shared.super_properties.lock().clone()
    }

    /// Deliver every staged record in batches of the configured part size.
    ///
    /// Failed batches stay staged. Returns the number delivered, or the
    /// first delivery error.
    pub fn flush(&self) -> Result<usize> {
        self.ensure_open()?;
        self.shared.flusher.flush_all(self.shared.flush_part_size)
    }

    /// Deliver at most `part_size` of the oldest staged records.
    ///
    /// With `drop_failed_record`, a failed batch is discarded instead of
    /// retried later.
    pub fn flush_part(&self, part_size: usize, drop_failed_record: bool) -> Result<usize> {
        self.ensure_open()?;
        self.shared.flusher.flush_part(part_size, drop_failed_record)
    }

    /// Drop every staged record, in memory and on disk.
    pub fn clear_queue(&self) -> Result<()> {
        self.ensure_open()?;
        self.shared.flusher.queue().lock().clear()
    }

    /// Number of records waiting for delivery.
    pub fn staged_count(&self) -> usize {
        self.shared.flusher.queue().lock().len()
    }

    pub fn server_url(&self) -> &str {
        self.shared.flusher.server_url()
    }

    pub fn storage_path(&self) -> &Path {
        &self.shared.storage_path
    }

    /// Stop the background worker, sync the journal, release it and clear
    /// the super properties. Staged records stay on disk for the next
    /// instance.
    ///
    /// Idempotent; every other call fails with [`Error::ShutDown`] afterwards.
    pub fn shutdown(&self) -> Result<()> {
        if self.shared.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.signal.send(Signal::Stop);
            if worker.handle.join().is_err() {
                warn!("eventstage: background flush worker panicked");
            }
        }

        self.shared.super_properties.lock().clear();
        let closed = self.shared.flusher.queue().lock().close();
        info!(
            "eventstage: shut down, journal kept at {}",
            self.shared.storage_path.display()
        );
        closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shared.shut_down.load(Ordering::SeqCst) {
            return Err(Error::ShutDown);
        }
        Ok(())
    }

    fn profile(&self, action: ActionType, properties: &PropertySet) -> Result<()> {
        self.ensure_open()?;
        self.stage(self.record(action).properties(properties.clone()))
    }

    /// A builder for the current identity.
    fn record(&self, action: ActionType) -> EventRecordBuilder {
        let identity = self.shared.identity.read();
        EventRecord::builder(action, identity.distinct_id.clone()).login_id(identity.is_login_id)
    }

    fn event_properties(&self, properties: &PropertySet) -> PropertySet {
        let mut merged = self.shared.super_properties.lock().clone();
        merged.merge(properties);
        merged
    }

    fn stage(&self, builder: EventRecordBuilder) -> Result<()> {
        let record = builder
            .created_at(self.shared.clock.now_millis())
            .track_id(self.shared.random.track_id())
            .build()?;

        let (result, before, staged): (AppendResult, usize, usize) = {
            let mut queue = self.shared.flusher.queue().lock();
            let before = queue.len();
            let result = queue.append(&record)?;
            (result, before, queue.len())
        };
        debug!(
            "eventstage: staged {} {} ({staged} pending)",
            record.action(),
            result.id
        );

        // Only a crossing into a full part wakes the worker; a backlog left
        // by failed deliveries waits for the next interval tick.
        let part = self.shared.flush_part_size;
        if before < part && staged >= part {
            if let Some(worker) = self.worker.lock().as_ref() {
                let _ = worker.signal.send(Signal::Flush);
            }
        }
        Ok(())
    }
}

impl Drop for Sdk {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("eventstage: shutdown on drop failed: {e}");
        }
    }
}

impl std::fmt::Debug for Sdk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sdk")
            .field("storage_path", &self.shared.storage_path)
            .field("server_url", &self.server_url())
            .field("shut_down", &self.shared.shut_down.load(Ordering::SeqCst))
            .finish()
    }
}

fn spawn_worker(shared: Arc<Shared>, interval: Duration) -> Result<Worker> {
    let (signal, signals) = mpsc::channel();
    let path = shared.storage_path.clone();
    let handle = thread::Builder::new()
        .name("eventstage-flush".to_string())
        .spawn(move || run_worker(&shared, &signals, interval))
        .map_err(|e| Error::storage(path, e))?;
    Ok(Worker { signal, handle })
}

fn run_worker(shared: &Shared, signals: &Receiver<Signal>, interval: Duration) {
    debug!("eventstage: background flush every {interval:?}");
    loop {
        match signals.recv_timeout(interval) {
            Ok(Signal::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(Signal::Flush) => {
                // Collapse a burst of wake-ups into one flush.
                let mut stop = false;
                while let Ok(signal) = signals.try_recv() {
                    if matches!(signal, Signal::Stop) {
                        stop = true;
                    }
                }
                if stop {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
        }

        match shared.flusher.flush_all(shared.flush_part_size) {
            Ok(0) => {}
            Ok(sent) => debug!("eventstage: background flush delivered {sent} record(s)"),
            Err(e) => warn!("eventstage: background flush failed: {e}"),
        }
    }
    debug!("eventstage: background flush worker stopped");
}
