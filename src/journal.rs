//! Append-only line journal backing the staging queue.
//!
//! Each line is one JSON [`JournalEntry`]. A `stage` line carries a record
//! and the xxh64 hash of its bytes; a `remove` line tombstones staged
//! sequence numbers. A final line without its trailing newline is a torn
//! write and is dropped on replay.

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Compute xxh64 hash of record bytes, hex-encoded.
pub fn line_hash(bytes: &[u8]) -> String {
    let hash = xxhash_rust::xxh64::xxh64(bytes, 0);
    format!("{:016x}", hash)
}

/// One line of the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub(crate) enum JournalEntry {
    Stage {
        seq: u64,
        hash: String,
        record: String,
    },
    Remove {
        seqs: Vec<u64>,
    },
}

impl JournalEntry {
    pub(crate) fn stage(seq: u64, record: &str) -> Self {
        JournalEntry::Stage {
            seq,
            hash: line_hash(record.as_bytes()),
            record: record.to_string(),
        }
    }
}

/// What [`Journal::replay`] found on disk.
#[derive(Debug, Default)]
pub(crate) struct Replay {
    /// Well-formed entries, in file order.
    pub entries: Vec<JournalEntry>,
    /// Complete lines that failed to parse or whose hash did not match.
    pub malformed: usize,
    /// Whether the file ended in a partial line.
    pub torn_tail: bool,
}

pub(crate) struct Journal {
    path: PathBuf,
    tmp_path: PathBuf,
    file: File,
    // Held for the lifetime of the journal; the lock drops with it.
    _lock: File,
    len: u64,
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

impl Journal {
    /// Open or create the journal at `path`, taking an exclusive lock.
    ///
    /// Creates parent directories as needed. Fails with
    /// [`io::ErrorKind::AlreadyExists`] if another journal holds the lock.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let lock_path = sibling(&path, ".lock");
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        if lock.try_lock_exclusive().is_err() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!(
                    "another writer holds the lock on {}",
                    path.display()
                ),
            ));
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;
        let len = file.metadata()?.len();

        Ok(Journal {
            tmp_path: sibling(&path, ".tmp"),
            path,
            file,
            _lock: lock,
            len,
        })
    }

    /// Current size of the journal in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Read every complete, well-formed line.
    ///
    /// Malformed lines and a torn final line are counted, not returned.
    pub fn replay(&self) -> io::Result<Replay> {
        let mut bytes = Vec::new();
        File::open(&self.path)?.read_to_end(&mut bytes)?;

        let mut replay = Replay::default();
        for chunk in bytes.split_inclusive(|&b| b == b'\n') {
            let Some(line) = chunk.strip_suffix(b"\n") else {
                replay.torn_tail = true;
                break;
            };
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<JournalEntry>(line) {
                Ok(JournalEntry::Stage { ref hash, ref record, .. })
                    if *hash != line_hash(record.as_bytes()) =>
                {
                    replay.malformed += 1;
                }
                Ok(entry) => replay.entries.push(entry),
                Err(_) => replay.malformed += 1,
            }
        }
        Ok(replay)
    }

    /// Append entries as one write, then sync.
    ///
    /// On failure the file is cut back to its previous length so a partial
    /// line never precedes the next append.
    pub fn append(&mut self, entries: &[JournalEntry]) -> io::Result<()> {
        let mut buf = Vec::new();
        for entry in entries {
            serde_json::to_writer(&mut buf, entry)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            buf.push(b'\n');
        }

        let written = self
            .file
            .write_all(&buf)
            .and_then(|()| self.file.sync_data());
        if let Err(e) = written {
            let _ = self.file.set_len(self.len);
            return Err(e);
        }
        self.len += buf.len() as u64;
        Ok(())
    }

    /// Replace the journal's contents with `entries`, atomically.
    ///
    /// Writes a `.tmp` sibling, syncs, renames it over the journal and keeps
    /// appending through the same handle. A crash at any point leaves either the old or the new file.
    pub fn rewrite(&mut self, entries: &[JournalEntry]) -> io::Result<()> {
        let mut buf = Vec::new();
        for entry in entries {
            serde_json::to_writer(&mut buf, entry)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            buf.push(b'\n');
        }

        // The handle follows the inode through the rename and becomes the
        // journal's append handle.
        let mut tmp = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&self.tmp_path)?;
        tmp.set_len(0)?;
        tmp.write_all(&buf)?;
        tmp.sync_all()?;

        fs::rename(&self.tmp_path, &self.path)?;
        self.file = tmp;
        self.len = buf.len() as u64;
        Ok(())
    }

    /// Truncate the journal to zero length.
    pub fn truncate(&mut self) -> io::Result<()> {
        self.file.set_len(0)?;
        self.file.sync_all()?;
        self.len = 0;
        Ok(())
    }

    /// Flush file contents and metadata to disk.
    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }
}
