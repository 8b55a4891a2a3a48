//! Scenario S5: a torn `partitionIndex` (or one deleted outright, simulating
//! a crash between a segment write and the index's own persistence) is
//! rebuilt from the `<stem>.index` files already on disk.

use fifoq::{Engine, EngineConfig};

#[test]
fn deleted_partition_index_is_rebuilt_on_next_query() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let mut engine = Engine::open(EngineConfig::new(&root)).unwrap();

    {
        let mut t = engine.topic("t");
        for i in 0..5 {
            t.push(format!("m{i}").into_bytes(), 0).unwrap();
        }
    }

    let partition_index = root.join("t").join("partitionIndex");
    assert!(partition_index.exists());
    std::fs::remove_file(&partition_index).unwrap();

    let mut t = engine.topic("t");
    // length() runs delay promotion and reads local_max_offset, which
    // repairs a missing/torn partitionIndex before anything else touches it.
    assert_eq!(t.length().unwrap(), 5);
    assert!(partition_index.exists(), "repair should recreate partitionIndex");

    for i in 0..5 {
        let msg = t.pop(false).unwrap().expect("message should survive repair");
        assert_eq!(msg.payload, format!("m{i}").into_bytes());
    }
    assert!(t.pop(false).unwrap().is_none());
}

#[test]
fn torn_partition_index_size_triggers_repair() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let mut engine = Engine::open(EngineConfig::new(&root)).unwrap();
    {
        let mut t = engine.topic("t");
        t.push(b"a".to_vec(), 0).unwrap();
    }

    let partition_index = root.join("t").join("partitionIndex");
    let mut bytes = std::fs::read(&partition_index).unwrap();
    bytes.push(0xFF); // one extra byte: size no longer a multiple of 4
    std::fs::write(&partition_index, &bytes).unwrap();

    let topic_dir = root.join("t");
    let rebuilt = fifoq::segment::repair_partition_index(&topic_dir).unwrap();
    assert!(rebuilt);
    let stems = fifoq::segment::discover_segment_stems(&topic_dir).unwrap();
    assert_eq!(std::fs::metadata(&partition_index).unwrap().len() as usize, stems.len() * 4);
}

#[test]
fn torn_dat_append_leaves_length_unchanged_and_push_still_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let mut engine = Engine::open(EngineConfig::new(&root)).unwrap();
    {
        let mut t = engine.topic("t");
        t.push(b"first".to_vec(), 0).unwrap();
    }

    // Simulate a crash between the .dat append and the .index append: bytes
    // landed in .dat for a second record that .index never learned about.
    let dat = root.join("t").join("0000000000.dat");
    let mut contents = std::fs::read(&dat).unwrap();
    contents.extend_from_slice(&[0xAB; 20]);
    std::fs::write(&dat, &contents).unwrap();

    let mut t = engine.topic("t");
    assert_eq!(t.length().unwrap(), 1, "orphaned .dat bytes past .index are invisible");

    t.push(b"second".to_vec(), 0).unwrap();
    assert_eq!(t.length().unwrap(), 2);
    let first = t.pop(false).unwrap().unwrap();
    let second = t.pop(false).unwrap().unwrap();
    assert_eq!(first.payload, b"first");
    assert_eq!(second.payload, b"second");
}
