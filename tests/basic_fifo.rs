//! Scenario S1: single topic, three payloads, in-order pop, empty after.

use fifoq::{Engine, EngineConfig};

#[test]
fn push_three_pop_three_then_empty() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::new(dir.path()).partition_size_mib(1);
    let mut engine = Engine::open(config).unwrap();

    {
        let mut t = engine.topic("t");
        t.push(b"a".to_vec(), 0).unwrap();
        t.push(b"bb".to_vec(), 0).unwrap();
        t.push(b"ccc".to_vec(), 0).unwrap();
    }

    assert_eq!(engine.topic("t").length().unwrap(), 3);

    let mut t = engine.topic("t");
    let m0 = t.pop(false).unwrap().expect("first message");
    assert_eq!(m0.offset, 0);
    assert_eq!(m0.payload, b"a");

    let m1 = t.pop(false).unwrap().expect("second message");
    assert_eq!(m1.offset, 1);
    assert_eq!(m1.payload, b"bb");

    let m2 = t.pop(false).unwrap().expect("third message");
    assert_eq!(m2.offset, 2);
    assert_eq!(m2.payload, b"ccc");

    assert!(t.pop(false).unwrap().is_none());
    assert_eq!(t.length().unwrap(), 0);
}

#[test]
fn push_multi_preserves_argument_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = Engine::open(EngineConfig::new(dir.path())).unwrap();
    let mut t = engine.topic("t");
    t.push_multi(&[
        (0, b"one".to_vec()),
        (0, b"two".to_vec()),
        (0, b"three".to_vec()),
    ])
    .unwrap();

    for (expected_offset, expected_payload) in [(0, "one"), (1, "two"), (2, "three")] {
        let msg = t.pop(false).unwrap().unwrap();
        assert_eq!(msg.offset, expected_offset);
        assert_eq!(msg.payload, expected_payload.as_bytes());
    }
}

#[test]
fn get_message_is_non_destructive() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = Engine::open(EngineConfig::new(dir.path())).unwrap();
    let mut t = engine.topic("t");
    t.push(b"only".to_vec(), 0).unwrap();

    let peeked = t.get_message(0).unwrap().expect("peeked message");
    assert_eq!(peeked.payload, b"only");
    assert_eq!(t.current_offset(false).unwrap(), 0);
    assert_eq!(t.length().unwrap(), 1);

    let popped = t.pop(false).unwrap().expect("popped message");
    assert_eq!(popped.payload, b"only");
    assert!(t.get_message(0).unwrap().is_some(), "segments are never deleted");
}
