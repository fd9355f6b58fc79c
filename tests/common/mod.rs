#![allow(dead_code)]

use eventstage::{
    ActionType, Clock, EventRecord, PropertySet, RandomSource, StagingQueue, Transport,
    TransportError,
};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};

pub const SERVER_URL: &str = "https://ingest.example.com/sa?project=default";

pub fn staging_path(dir: &Path) -> PathBuf {
    dir.join("staging.jsonl")
}

pub fn track_record(name: &str) -> EventRecord {
    let mut props = PropertySet::new();
    props.set_string("key", "value").unwrap();
    EventRecord::builder(ActionType::Track, "user_1")
        .name(name)
        .properties(props)
        .created_at(1_000)
        .track_id(7)
        .build()
        .unwrap()
}

pub fn append_n(queue: &mut StagingQueue, n: usize) {
    for i in 0..n {
        queue.append(&track_record(&format!("event_{i}"))).unwrap();
    }
}

/// Event names of the staged records, oldest first.
pub fn staged_names(queue: &StagingQueue) -> Vec<String> {
    queue
        .peek_batch(usize::MAX)
        .unwrap()
        .iter()
        .map(|r| {
            let value: serde_json::Value = serde_json::from_str(r.payload()).unwrap();
            value["event"].as_str().unwrap_or_default().to_string()
        })
        .collect()
}

/// Records every batch it is given; fails on demand.
#[derive(Default)]
pub struct MockTransport {
    pub batches: Mutex<Vec<Vec<String>>>,
    pub urls: Mutex<Vec<String>>,
    should_fail: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let transport = Self::default();
        transport.set_should_fail(true);
        transport
    }

    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent_batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().clone()
    }

    /// Every delivered record, parsed, in delivery order.
    pub fn sent_records(&self) -> Vec<serde_json::Value> {
        self.batches
            .lock()
            .iter()
            .flatten()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }
}

impl Transport for MockTransport {
    fn send(&self, server_url: &str, batch: &[String]) -> Result<(), TransportError> {
        self.urls.lock().push(server_url.to_string());
        if self.should_fail.load(Ordering::SeqCst) {
            return Err("mock failure: 503 service unavailable".into());
        }
        self.batches.lock().push(batch.to_vec());
        Ok(())
    }
}

/// A clock that starts at a fixed instant and moves only when told to.
pub struct FixedClock(pub AtomicI64);

impl FixedClock {
    pub fn at(millis: i64) -> Self {
        FixedClock(AtomicI64::new(millis))
    }
}

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Hands out 1, 2, 3, ...
#[derive(Default)]
pub struct CountingRandom(pub AtomicU32);

impl RandomSource for CountingRandom {
    fn track_id(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}
