mod common;

use common::{append_n, staged_names, staging_path, track_record};
use eventstage::{Error, StagingQueue};
use std::fs;
use tempfile::tempdir;

#[test]
fn test_open_creates_journal_and_parent_directories() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested/deeper/staging.jsonl");

    let queue = StagingQueue::open(&path, 10).unwrap();

    assert!(path.exists(), "journal should be created");
    assert!(queue.is_empty());
    assert_eq!(queue.capacity(), 10);
    assert_eq!(queue.path(), path.as_path());
}

#[test]
fn test_zero_capacity_rejected() {
    let dir = tempdir().unwrap();
    let err = StagingQueue::open(staging_path(dir.path()), 0).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}

#[test]
fn test_append_and_peek_in_order() {
    let dir = tempdir().unwrap();
    let mut queue = StagingQueue::open(staging_path(dir.path()), 10).unwrap();

    append_n(&mut queue, 3);

    assert_eq!(queue.len(), 3);
    assert_eq!(staged_names(&queue), ["event_0", "event_1", "event_2"]);

    let batch = queue.peek_batch(2).unwrap();
    assert_eq!(batch.len(), 2);
    assert!(batch[0].id() < batch[1].id());
    assert_eq!(queue.len(), 3, "peek must not remove");
}

#[test]
fn test_peek_more_than_available() {
    let dir = tempdir().unwrap();
    let mut queue = StagingQueue::open(staging_path(dir.path()), 10).unwrap();
    append_n(&mut queue, 2);

    assert_eq!(queue.peek_batch(100).unwrap().len(), 2);
    assert!(queue.peek_batch(0).unwrap().is_empty());
}

#[test]
fn test_append_returns_payload_of_record() {
    let dir = tempdir().unwrap();
    let mut queue = StagingQueue::open(staging_path(dir.path()), 10).unwrap();
    let record = track_record("Purchase");

    let result = queue.append(&record).unwrap();
    let batch = queue.peek_batch(1).unwrap();

    assert_eq!(result.evicted, None);
    assert_eq!(batch[0].id(), result.id);
    assert_eq!(batch[0].payload(), record.to_json().unwrap());
}

#[test]
fn test_overflow_evicts_oldest() {
    let dir = tempdir().unwrap();
    let mut queue = StagingQueue::open(staging_path(dir.path()), 3).unwrap();

    let mut ids = Vec::new();
    for i in 0..3 {
        ids.push(queue.append(&track_record(&format!("event_{i}"))).unwrap().id);
    }
    let result = queue.append(&track_record("event_3")).unwrap();
    assert_eq!(result.evicted, Some(ids[0]));

    let result = queue.append(&track_record("event_4")).unwrap();
    assert_eq!(result.evicted, Some(ids[1]));

    assert_eq!(queue.len(), 3);
    assert_eq!(staged_names(&queue), ["event_2", "event_3", "event_4"]);
}

#[test]
fn test_eviction_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = staging_path(dir.path());
    {
        let mut queue = StagingQueue::open(&path, 2).unwrap();
        append_n(&mut queue, 5);
    }

    let queue = StagingQueue::open(&path, 2).unwrap();
    assert_eq!(staged_names(&queue), ["event_3", "event_4"]);
}

#[test]
fn test_remove_batch() {
    let dir = tempdir().unwrap();
    let mut queue = StagingQueue::open(staging_path(dir.path()), 10).unwrap();
    append_n(&mut queue, 4);

    let ids: Vec<_> = queue.peek_batch(2).unwrap().iter().map(|r| r.id()).collect();
    assert_eq!(queue.remove_batch(&ids).unwrap(), 2);

    assert_eq!(staged_names(&queue), ["event_2", "event_3"]);
}

#[test]
fn test_remove_unknown_ids_is_noop() {
    let dir = tempdir().unwrap();
    let path = staging_path(dir.path());
    let mut queue = StagingQueue::open(&path, 2).unwrap();
    append_n(&mut queue, 1);
    let stale = queue.peek_batch(1).unwrap()[0].id();

    // Two more appends evict the peeked record.
    append_n(&mut queue, 2);
    let size_before = fs::metadata(&path).unwrap().len();

    assert_eq!(queue.remove_batch(&[stale]).unwrap(), 0);
    assert_eq!(queue.len(), 2);
    assert_eq!(fs::metadata(&path).unwrap().len(), size_before);
}

#[test]
fn test_removal_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = staging_path(dir.path());
    {
        let mut queue = StagingQueue::open(&path, 10).unwrap();
        append_n(&mut queue, 5);
        let ids: Vec<_> = queue.peek_batch(3).unwrap().iter().map(|r| r.id()).collect();
        queue.remove_batch(&ids).unwrap();
    }

    let queue = StagingQueue::open(&path, 10).unwrap();
    assert_eq!(staged_names(&queue), ["event_3", "event_4"]);
}

#[test]
fn test_ids_keep_increasing_across_reopen() {
    let dir = tempdir().unwrap();
    let path = staging_path(dir.path());
    let last = {
        let mut queue = StagingQueue::open(&path, 10).unwrap();
        append_n(&mut queue, 3);
        queue.peek_batch(3).unwrap()[2].id()
    };

    let mut queue = StagingQueue::open(&path, 10).unwrap();
    let next = queue.append(&track_record("after")).unwrap().id;
    assert!(next > last);
}

#[test]
fn test_clear_empties_memory_and_disk() {
    let dir = tempdir().unwrap();
    let path = staging_path(dir.path());
    {
        let mut queue = StagingQueue::open(&path, 10).unwrap();
        append_n(&mut queue, 4);
        queue.clear().unwrap();
        assert!(queue.is_empty());
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);

        append_n(&mut queue, 1);
    }

    let queue = StagingQueue::open(&path, 10).unwrap();
    assert_eq!(staged_names(&queue), ["event_0"]);
}

#[test]
fn test_journal_lines_are_json() {
    let dir = tempdir().unwrap();
    let path = staging_path(dir.path());
    let mut queue = StagingQueue::open(&path, 10).unwrap();
    append_n(&mut queue, 2);
    let first = queue.peek_batch(1).unwrap()[0].id();
    queue.remove_batch(&[first]).unwrap();

    let contents = fs::read_to_string(&path).unwrap();
    let lines: Vec<serde_json::Value> = contents
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();

    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["op"], "stage");
    assert_eq!(lines[1]["op"], "stage");
    assert_eq!(lines[2]["op"], "remove");
    assert_eq!(lines[2]["seqs"], serde_json::json!([first.get()]));
    assert!(contents.ends_with('\n'));
}

#[test]
fn test_compaction_bounds_journal_size() {
    let dir = tempdir().unwrap();
    let path = staging_path(dir.path());
    let mut queue = StagingQueue::open(&path, 5).unwrap();

    append_n(&mut queue, 500);

    let lines = fs::read_to_string(&path).unwrap().lines().count();
    assert_eq!(queue.len(), 5);
    assert!(lines < 150, "journal should be compacted, has {lines} lines");
}

#[test]
fn test_sync_compacts_to_live_records() {
    let dir = tempdir().unwrap();
    let path = staging_path(dir.path());
    let mut queue = StagingQueue::open(&path, 10).unwrap();
    append_n(&mut queue, 4);
    let ids: Vec<_> = queue.peek_batch(2).unwrap().iter().map(|r| r.id()).collect();
    queue.remove_batch(&ids).unwrap();

    queue.sync().unwrap();

    let contents = fs::read_to_string(&path).unwrap();
    assert_eq!(contents.lines().count(), 2);
    assert!(!contents.contains(r#""op":"remove""#));
}

#[test]
fn test_second_open_fails_while_locked() {
    let dir = tempdir().unwrap();
    let path = staging_path(dir.path());
    let _queue = StagingQueue::open(&path, 10).unwrap();

    let err = StagingQueue::open(&path, 10).unwrap_err();
    match err {
        Error::Storage { source, .. } => {
            assert_eq!(source.kind(), std::io::ErrorKind::AlreadyExists);
            assert!(source.to_string().contains("another writer holds the lock"));
        }
        other => panic!("expected storage error, got {other:?}"),
    }
}

#[test]
fn test_lock_released_on_drop_and_close() {
    let dir = tempdir().unwrap();
    let path = staging_path(dir.path());
    {
        let _queue = StagingQueue::open(&path, 10).unwrap();
    }
    let mut queue = StagingQueue::open(&path, 10).unwrap();
    queue.close().unwrap();

    let _reopened = StagingQueue::open(&path, 10).unwrap();
}

#[test]
fn test_closed_queue_rejects_operations() {
    let dir = tempdir().unwrap();
    let mut queue = StagingQueue::open(staging_path(dir.path()), 10).unwrap();
    append_n(&mut queue, 1);
    queue.close().unwrap();
    queue.close().unwrap();

    assert!(queue.is_closed());
    assert!(matches!(queue.append(&track_record("x")), Err(Error::ShutDown)));
    assert!(matches!(queue.peek_batch(1), Err(Error::ShutDown)));
    assert!(matches!(queue.clear(), Err(Error::ShutDown)));
    assert!(matches!(queue.recover(), Err(Error::ShutDown)));
}

#[test]
fn test_unwritable_path_fails() {
    let dir = tempdir().unwrap();
    let blocker = dir.path().join("not_a_dir");
    fs::write(&blocker, "file").unwrap();

    let err = StagingQueue::open(blocker.join("staging.jsonl"), 10).unwrap_err();
    assert!(matches!(err, Error::Storage { .. }));
}
