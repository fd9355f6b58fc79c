mod common;

use common::{staged_names, staging_path, track_record};
use eventstage::{PropertySet, StagingQueue, format_datetime, parse_datetime};
use proptest::prelude::*;
use std::collections::VecDeque;
use tempfile::tempdir;

#[derive(Debug, Clone)]
enum Op {
    Append,
    Remove(usize),
    Reopen,
    Clear,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => Just(Op::Append),
        3 => (1usize..5).prop_map(Op::Remove),
        1 => Just(Op::Reopen),
        1 => Just(Op::Clear),
    ]
}

// For any sequence of operations the queue matches a plain bounded deque
// that drops its front on overflow, including across reopen.
proptest! {
    #[test]
    fn prop_queue_matches_bounded_model(
        capacity in 1usize..8,
        ops in proptest::collection::vec(arb_op(), 0..60),
    ) {
        let dir = tempdir().unwrap();
        let path = staging_path(dir.path());
        let mut queue = StagingQueue::open(&path, capacity).unwrap();
        let mut model: VecDeque<String> = VecDeque::new();
        let mut counter = 0;

        for op in ops {
            match op {
                Op::Append => {
                    let name = format!("event_{counter}");
                    counter += 1;
                    queue.append(&track_record(&name)).unwrap();
                    model.push_back(name);
                    if model.len() > capacity {
                        model.pop_front();
                    }
                }
                Op::Remove(n) => {
                    let ids: Vec<_> = queue.peek_batch(n).unwrap().iter().map(|r| r.id()).collect();
                    queue.remove_batch(&ids).unwrap();
                    for _ in 0..n.min(model.len()) {
                        model.pop_front();
                    }
                }
                Op::Reopen => {
                    drop(queue);
                    queue = StagingQueue::open(&path, capacity).unwrap();
                }
                Op::Clear => {
                    queue.clear().unwrap();
                    model.clear();
                }
            }
            prop_assert!(queue.len() <= capacity);
        }

        let expected: Vec<String> = model.into_iter().collect();
        prop_assert_eq!(staged_names(&queue), expected);
    }
}

// Recovering twice yields the same queue as recovering once.
proptest! {
    #[test]
    fn prop_recovery_is_idempotent(count in 0usize..20, capacity in 1usize..10, cut in 0usize..200) {
        let dir = tempdir().unwrap();
        let path = staging_path(dir.path());
        {
            let mut queue = StagingQueue::open(&path, 32).unwrap();
            for i in 0..count {
                queue.append(&track_record(&format!("event_{i}"))).unwrap();
            }
        }

        // Chop an arbitrary number of bytes off the end to simulate a torn write.
        let bytes = std::fs::read(&path).unwrap();
        let keep = bytes.len().saturating_sub(cut);
        std::fs::write(&path, &bytes[..keep]).unwrap();

        let mut queue = StagingQueue::open(&path, capacity).unwrap();
        let first = staged_names(&queue);
        let report = queue.recover().unwrap();
        prop_assert_eq!(report.discarded, 0);
        prop_assert_eq!(report.evicted, 0);
        prop_assert_eq!(staged_names(&queue), first.clone());
        prop_assert!(first.len() <= capacity.min(count));
    }
}

proptest! {
    #[test]
    fn prop_string_properties_round_trip_through_json(value in "\\PC{0,64}") {
        let mut props = PropertySet::new();
        props.set_string("text", value.clone()).unwrap();

        let parsed: serde_json::Value = serde_json::from_str(&props.to_json().unwrap()).unwrap();
        prop_assert_eq!(parsed["text"].as_str(), Some(value.as_str()));
    }

    #[test]
    fn prop_datetime_text_round_trips(seconds in 0i64..4_102_444_800, millis in 0u32..1000) {
        let text = format_datetime(seconds, millis).unwrap();
        prop_assert_eq!(text.len(), 23);
        prop_assert_eq!(parse_datetime(&text), Some((seconds, millis)));
    }
}
