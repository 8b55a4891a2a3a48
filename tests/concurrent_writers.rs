//! Scenario S6: concurrent writers against one topic directory. Each
//! writer here owns an independent `Engine` (and therefore an independent
//! `Cache` of file handles) over the same root, which is the in-process
//! analogue of "two processes" — `flock` advisory locks are scoped to the
//! open file description, not the process, so two independently-opened
//! handles serialize exactly as they would across a `fork`.

use std::collections::HashSet;
use std::thread;

use fifoq::{Engine, EngineConfig};

const WRITERS: usize = 2;
const PER_WRITER: usize = 1_000;

#[test]
fn two_concurrent_writers_produce_every_sequence_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();

    // Touch the topic directory once up front so both writers race on an
    // already-existing `partitionIndex` rather than one of them also racing
    // to create the topic directory itself.
    Engine::open(EngineConfig::new(&root))
        .unwrap()
        .topic("t")
        .push(b"seed".to_vec(), 0)
        .unwrap();

    let handles: Vec<_> = (0..WRITERS)
        .map(|writer_id| {
            let root = root.clone();
            thread::spawn(move || {
                let mut engine = Engine::open(EngineConfig::new(&root)).unwrap();
                let mut t = engine.topic("t");
                for i in 0..PER_WRITER {
                    t.push(format!("w{writer_id}-{i}").into_bytes(), 0).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut engine = Engine::open(EngineConfig::new(&root)).unwrap();
    let mut t = engine.topic("t");
    assert_eq!(t.length().unwrap(), (WRITERS * PER_WRITER + 1) as i64);

    let mut seen_payloads = HashSet::new();
    let mut offsets = Vec::new();
    while let Some(msg) = t.pop(false).unwrap() {
        offsets.push(msg.offset);
        assert!(seen_payloads.insert(msg.payload), "every payload recovered exactly once");
    }

    offsets.sort_unstable();
    let expected: Vec<i64> = (0..offsets.len() as i64).collect();
    assert_eq!(offsets, expected, "sequence numbers 0..N-1 all present, none skipped or doubled");
    assert!(t.pop(false).unwrap().is_none());
}
