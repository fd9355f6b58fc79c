use crate::error::{Error, Result};
use crate::journal::{Journal, JournalEntry};
use crate::record::EventRecord;
use log::{debug, info, warn};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

/// Dead journal lines tolerated before an automatic compaction.
const COMPACT_MIN_DEAD_LINES: usize = 64;

/// Identifies a staged record. Ids increase monotonically in append order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(u64);

impl RecordId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A serialized record waiting for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedRecord {
    id: RecordId,
    payload: String,
}

impl StagedRecord {
    pub fn id(&self) -> RecordId {
        self.id
    }

    /// The record's JSON wire form.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn into_payload(self) -> String {
        self.payload
    }
}

/// Outcome of [`StagingQueue::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendResult {
    /// Id assigned to the new record.
    pub id: RecordId,
    /// The oldest record, if it had to make room.
    pub evicted: Option<RecordId>,
}

/// What [`StagingQueue::recover`] rebuilt from disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Records restored to the queue.
    pub recovered: usize,
    /// Journal lines thrown away as torn, malformed or duplicated.
    pub discarded: usize,
    /// Records evicted because the journal held more than the capacity.
    pub evicted: usize,
}

/// A bounded, durable FIFO of serialized [`EventRecord`]s.
///
/// Every mutation is written to an append-only journal and synced before it
/// takes effect in memory, so the in-memory view never runs ahead of disk.
/// When an append would exceed the capacity, the oldest record is evicted in
/// the same journal write.
///
/// The queue itself is not synchronized; share it behind a mutex (the
/// [`Flusher`](crate::Flusher) and [`Sdk`](crate::Sdk) use
/// `parking_lot::Mutex`).
///
/// # Examples
///
/// ```
/// use eventstage::{ActionType, EventRecord, StagingQueue};
///
/// # let dir = tempfile::tempdir().unwrap();
/// let mut queue = StagingQueue::open(dir.path().join("staging.jsonl"), 2)?;
/// for name in ["first", "second", "third"] {
///     let record = EventRecord::builder(ActionType::Track, "u1").name(name).build()?;
///     queue.append(&record)?;
/// }
///
/// // "first" was evicted to keep the queue within capacity.
/// assert_eq!(queue.len(), 2);
/// # Ok::<(), eventstage::Error>(())
/// ```
pub struct StagingQueue {
    path: PathBuf,
    journal: Option<Journal>,
    entries: VecDeque<StagedRecord>,
    capacity: usize,
    next_seq: u64,
    dead_lines: usize,
}

impl std::fmt::Debug for StagingQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingQueue")
            .field("path", &self.path)
            .field("len", &self.entries.len())
            .field("capacity", &self.capacity)
            .field("closed", &self.journal.is_none())
            .finish()
    }
}

impl StagingQueue {
    /// Open the queue stored at `path`, recovering any staged records.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if `capacity` is zero. `Storage` if the journal cannot
    /// be created or written, or another queue already holds its lock.
    pub fn open(path: impl AsRef<Path>, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidConfig(
                "max_staging_record_count must be greater than zero".to_string(),
            ));
        }
        let path = path.as_ref().to_path_buf();
        let journal = Journal::open(&path).map_err(|e| Error::storage(&path, e))?;

        let mut queue = StagingQueue {
            path,
            journal: Some(journal),
            entries: VecDeque::new(),
            capacity,
            next_seq: 0,
            dead_lines: 0,
        };
        queue.recover()?;
        Ok(queue)
    }

    /// Rebuild the in-memory queue from the journal.
    ///
    /// Torn, malformed and duplicated lines are dropped with a warning. If
    /// the journal holds more records than the capacity, the oldest are
    /// evicted. Whenever anything was dropped the journal is rewritten so it
    /// holds only the live records.
    ///
    /// An unreadable journal is treated as empty.
    pub fn recover(&mut self) -> Result<RecoveryReport> {
        let journal = self.journal.as_mut().ok_or(Error::ShutDown)?;

        let (replay, unreadable) = match journal.replay() {
            Ok(replay) => (replay, false),
            Err(e) => {
                warn!(
                    "eventstage: staging journal {} is unreadable, starting empty: {e}",
                    self.path.display()
                );
                (Default::default(), true)
            }
        };

        let mut report = RecoveryReport {
            discarded: replay.malformed + usize::from(replay.torn_tail),
            ..Default::default()
        };
        let mut entries: VecDeque<StagedRecord> = VecDeque::new();
        let mut seen = HashSet::new();
        let mut dead_lines = replay.malformed;
        let mut next_seq = 0;

        for entry in replay.entries {
            match entry {
                JournalEntry::Stage { seq, record, .. } => {
                    next_seq = next_seq.max(seq + 1);
                    if !seen.insert(seq) {
                        report.discarded += 1;
                        dead_lines += 1;
                        continue;
                    }
                    entries.push_back(StagedRecord {
                        id: RecordId(seq),
                        payload: record,
                    });
                }
                JournalEntry::Remove { seqs } => {
                    let removed: HashSet<u64> = seqs.into_iter().collect();
                    let before = entries.len();
                    entries.retain(|r| !removed.contains(&r.id.0));
                    dead_lines += 1 + (before - entries.len());
                }
            }
        }

        while entries.len() > self.capacity {
            if let Some(evicted) = entries.pop_front() {
                report.evicted += 1;
                debug!("eventstage: evicting {} during recovery", evicted.id);
            }
        }

        if report.discarded > 0 {
            warn!(
                "eventstage: discarded {} damaged line(s) from {}",
                report.discarded,
                self.path.display()
            );
        }
        if report.evicted > 0 {
            warn!(
                "eventstage: evicted {} record(s) over capacity {} while recovering {}",
                report.evicted,
                self.capacity,
                self.path.display()
            );
        }

        report.recovered = entries.len();
        self.entries = entries;
        self.next_seq = self.next_seq.max(next_seq);
        self.dead_lines = dead_lines;

        if unreadable || report.discarded > 0 || report.evicted > 0 || self.dead_lines > 0 {
            self.compact()?;
        }

        info!(
            "eventstage: recovered {} staged record(s) from {}",
            report.recovered,
            self.path.display()
        );
        Ok(report)
    }

    /// Persist `record` and add it to the back of the queue.
    ///
    /// If the queue is full, the oldest record is evicted in the same
    /// journal write.
    ///
    /// # Errors
    ///
    /// `Storage` if the write fails; the queue is then unchanged and the
    /// record is not staged.
    pub fn append(&mut self, record: &EventRecord) -> Result<AppendResult> {
        let payload = record.to_json()?;
        let journal = self.journal.as_mut().ok_or(Error::ShutDown)?;

        let id = RecordId(self.next_seq);
        let evict = if self.entries.len() >= self.capacity {
            self.entries.front().map(|r| r.id)
        } else {
            None
        };

        let mut lines = vec![JournalEntry::stage(id.0, &payload)];
        if let Some(old) = evict {
            lines.push(JournalEntry::Remove { seqs: vec![old.0] });
        }
        journal
            .append(&lines)
            .map_err(|e| Error::storage(&self.path, e))?;

        self.next_seq += 1;
        if let Some(old) = evict {
            self.entries.pop_front();
            self.dead_lines += 2;
            warn!(
                "eventstage: staging queue full ({}), evicted oldest record {old}",
                self.capacity
            );
        }
        self.entries.push_back(StagedRecord { id, payload });

        self.maybe_compact();
        Ok(AppendResult { id, evicted: evict })
    }

    /// Return up to `max_n` of the oldest records without removing them.
    pub fn peek_batch(&self, max_n: usize) -> Result<Vec<StagedRecord>> {
        if self.journal.is_none() {
            return Err(Error::ShutDown);
        }
        Ok(self.entries.iter().take(max_n).cloned().collect())
    }

    /// Durably remove the given records.
    ///
    /// Ids no longer in the queue (already evicted or removed) are ignored.
    /// Returns how many records were removed.
    pub fn remove_batch(&mut self, ids: &[RecordId]) -> Result<usize> {
        let journal = self.journal.as_mut().ok_or(Error::ShutDown)?;

        let wanted: HashSet<RecordId> = ids.iter().copied().collect();
        let present: Vec<u64> = self
            .entries
            .iter()
            .filter(|r| wanted.contains(&r.id))
            .map(|r| r.id.0)
            .collect();
        if present.is_empty() {
            return Ok(0);
        }

        journal
            .append(&[JournalEntry::Remove {
                seqs: present.clone(),
            }])
            .map_err(|e| Error::storage(&self.path, e))?;

        self.entries.retain(|r| !wanted.contains(&r.id));
        self.dead_lines += present.len() + 1;
        debug!("eventstage: removed {} staged record(s)", present.len());

        self.maybe_compact();
        Ok(present.len())
    }

    /// Drop every staged record, in memory and on disk.
    pub fn clear(&mut self) -> Result<()> {
        let journal = self.journal.as_mut().ok_or(Error::ShutDown)?;
        journal
            .truncate()
            .map_err(|e| Error::storage(&self.path, e))?;
        let dropped = self.entries.len();
        self.entries.clear();
        self.dead_lines = 0;
        info!("eventstage: cleared {dropped} staged record(s)");
        Ok(())
    }

    /// Compact the journal if it holds dead lines, then sync it to disk.
    pub fn sync(&mut self) -> Result<()> {
        if self.dead_lines > 0 {
            self.compact()?;
        }
        let journal = self.journal.as_ref().ok_or(Error::ShutDown)?;
        journal.sync().map_err(|e| Error::storage(&self.path, e))
    }

    /// Sync and release the journal and its lock.
    ///
    /// Every later operation returns [`Error::ShutDown`]. Closing twice is a
    /// no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.journal.is_none() {
            return Ok(());
        }
        let synced = self.sync();
        self.journal = None;
        synced
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of records the queue holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Path of the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.journal.is_none()
    }

    fn maybe_compact(&mut self) {
        if self.dead_lines >= COMPACT_MIN_DEAD_LINES && self.dead_lines > self.entries.len() {
            // The journal is still correct without compaction; retry next time.
            if let Err(e) = self.compact() {
                warn!("eventstage: journal compaction failed: {e}");
            }
        }
    }

    fn compact(&mut self) -> Result<()> {
        let journal = self.journal.as_mut().ok_or(Error::ShutDown)?;
        let live: Vec<JournalEntry> = self
            .entries
            .iter()
            .map(|r| JournalEntry::stage(r.id.0, &r.payload))
            .collect();
        let before = journal.len();
        journal
            .rewrite(&live)
            .map_err(|e| Error::storage(&self.path, e))?;
        debug!(
            "eventstage: compacted {} from {before} to {} bytes",
            self.path.display(),
            journal.len()
        );
        self.dead_lines = 0;
        Ok(())
    }
}
