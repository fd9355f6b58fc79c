use crate::error::{Error, Result};
use crate::queue::{RecordId, StagingQueue};
use crate::transport::Transport;
use log::{debug, warn};
use parking_lot::Mutex;
use std::sync::Arc;

/// Drains a [`StagingQueue`] into a [`Transport`] in bounded batches.
///
/// The queue lock is held only to peek and to remove; the transport call
/// runs without it, so producers never wait on the network. Flushes are
/// serialized among themselves so two callers never send the same batch.
///
/// # Examples
///
/// ```
/// use eventstage::{ActionType, EventRecord, Flusher, StagingQueue, TransportError};
/// use parking_lot::Mutex;
/// use std::sync::Arc;
///
/// # let dir = tempfile::tempdir().unwrap();
/// let queue = Arc::new(Mutex::new(StagingQueue::open(dir.path().join("q.jsonl"), 100)?));
/// let record = EventRecord::builder(ActionType::Track, "u1").name("Opened").build()?;
/// queue.lock().append(&record)?;
///
/// let transport = Arc::new(|_: &str, _: &[String]| -> Result<(), TransportError> { Ok(()) });
/// let flusher = Flusher::new(queue.clone(), transport, "https://ingest.example.com/sa");
///
/// assert_eq!(flusher.flush_part(10, false)?, 1);
/// assert!(queue.lock().is_empty());
/// # Ok::<(), eventstage::Error>(())
/// ```
pub struct Flusher {
    queue: Arc<Mutex<StagingQueue>>,
    transport: Arc<dyn Transport>,
    server_url: String,
    drain: Mutex<()>,
}

impl Flusher {
    pub fn new(
        queue: Arc<Mutex<StagingQueue>>,
        transport: Arc<dyn Transport>,
        server_url: impl Into<String>,
    ) -> Self {
        Flusher {
            queue,
            transport,
            server_url: server_url.into(),
            drain: Mutex::new(()),
        }
    }

    /// Attempt delivery of up to `part_size` of the oldest staged records.
    ///
    /// On success the delivered records are removed and their count is
    /// returned; an empty queue returns `Ok(0)` without calling the
    /// transport. On transport failure the records stay staged for the next
    /// attempt, unless `drop_failed_record` is set, in which case they are
    /// discarded. Either way the failure is returned as
    /// [`Error::Delivery`].
    pub fn flush_part(&self, part_size: usize, drop_failed_record: bool) -> Result<usize> {
        let _drain = self.drain.lock();
        self.flush_part_locked(part_size, drop_failed_record)
    }

    /// Flush the whole queue in batches of `part_size`, retaining failures.
    ///
    /// Stops at the first failed batch. Only the batches present when the
    /// call starts are attempted, so concurrent producers cannot keep it
    /// running. Returns the number of records delivered.
    pub fn flush_all(&self, part_size: usize) -> Result<usize> {
        let _drain = self.drain.lock();
        if part_size == 0 {
            return Ok(0);
        }

        let rounds = self.queue.lock().len().div_ceil(part_size);
        let mut delivered = 0;
        for _ in 0..rounds {
            let sent = self.flush_part_locked(part_size, false)?;
            if sent == 0 {
                break;
            }
            delivered += sent;
        }
        Ok(delivered)
    }

    /// The queue this flusher drains.
    pub fn queue(&self) -> &Arc<Mutex<StagingQueue>> {
        &self.queue
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn flush_part_locked(&self, part_size: usize, drop_failed_record: bool) -> Result<usize> {
        let batch = self.queue.lock().peek_batch(part_size)?;
        if batch.is_empty() {
            return Ok(0);
        }

        let ids: Vec<RecordId> = batch.iter().map(|r| r.id()).collect();
        let payloads: Vec<String> = batch.into_iter().map(|r| r.into_payload()).collect();

        match self.transport.send(&self.server_url, &payloads) {
            Ok(()) => {
                let removed = self.queue.lock().remove_batch(&ids)?;
                debug!(
                    "eventstage: delivered {} record(s), removed {removed} from staging",
                    ids.len()
                );
                Ok(ids.len())
            }
            Err(e) => {
                if drop_failed_record {
                    warn!(
                        "eventstage: delivery of {} record(s) failed, dropping them: {e}",
                        ids.len()
                    );
                    if let Err(remove_err) = self.queue.lock().remove_batch(&ids) {
                        warn!("eventstage: could not drop failed records: {remove_err}");
                    }
                } else {
                    warn!(
                        "eventstage: delivery of {} record(s) failed, keeping them staged: {e}",
                        ids.len()
                    );
                }
                Err(Error::Delivery(e.to_string()))
            }
        }
    }
}

impl std::fmt::Debug for Flusher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flusher")
            .field("server_url", &self.server_url)
            .finish()
    }
}
