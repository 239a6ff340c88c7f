//! Integration tests for the public `Engine` write-path API.
//!
//! These exercise the full pipeline (ingest channel -> write-loop -> switch
//! -> flush worker -> L0) through `shardkv::{Engine, EngineConfig, Entry,
//! SplitRequest}` only. No internal modules are referenced.

use std::time::{Duration, Instant};

use bytes::Bytes;
use shardkv::{Engine, EngineConfig, Entry, SplitRequest};
use tempfile::tempdir;

/// Installs a `tracing-subscriber` `fmt` layer so the Switch/Flush/Split
/// events emitted around the write path (§10.3) are visible under
/// `cargo test -- --nocapture`. Harmless to call more than once.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn small_buffer_config(dir: &std::path::Path) -> EngineConfig {
    init_tracing();
    EngineConfig {
        max_memtable_size: 1024,
        num_cfs: 1,
        ..EngineConfig::default().with_dir(dir)
    }
}

/// Forces whatever is currently in the writable head to switch out (and, if
/// non-empty, flush) by pushing a batch that, on its own, already exceeds the
/// configured capacity. Mirrors how a real caller's next write naturally
/// triggers the rotation a prior round of small writes left primed.
fn nudge(engine: &Engine, cf: usize) {
    engine
        .write(vec![Entry::new(cf, Bytes::from_static(b"~nudge~"), Bytes::from(vec![b'x'; 2048]))])
        .expect("nudge write");
}

fn wait_for_l0_count(engine: &Engine, want: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if engine.l0_tables().len() >= want {
            return;
        }
        if Instant::now() > deadline {
            panic!("timed out waiting for {want} L0 table(s), saw {}", engine.l0_tables().len());
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

// Scenario 1 (single-batch flush): one shard spanning the whole key space,
// a single oversized batch should switch out as its own memtable and flush
// to exactly one L0 file with one shard.
#[test]
fn scenario_1_single_batch_flush() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(small_buffer_config(dir.path())).unwrap();

    let entries: Vec<Entry> = (0..50)
        .map(|i| Entry::new(0, Bytes::from(format!("key-{i:04}")), Bytes::from(vec![b'v'; 36])))
        .collect();
    engine.write(entries).unwrap();
    nudge(&engine, 0);

    wait_for_l0_count(&engine, 1);
    let tables = engine.l0_tables();
    let table = &tables[0];
    assert_eq!(table.index.num_shards(), 1);
    assert_eq!(table.index.start_keys[0], Bytes::new());

    let data_len = std::fs::metadata(table.data_path()).unwrap().len();
    assert_eq!(*table.index.end_offsets.last().unwrap() as u64, data_len);

    engine.close();
}

// Scenario 2 (shard partitioning): two shards, entries route to the shard
// owning their key at flush time.
#[test]
fn scenario_2_shard_partitioning() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(small_buffer_config(dir.path())).unwrap();

    let whole = engine.shard_map().get(b"x").clone();
    engine
        .split(vec![SplitRequest {
            shard: whole,
            split_keys: vec![Bytes::from_static(b"m")],
        }])
        .unwrap();
    assert_eq!(engine.shard_map().len(), 2);

    engine
        .write(vec![
            Entry::new(0, Bytes::from_static(b"a"), Bytes::from_static(b"1")),
            Entry::new(0, Bytes::from_static(b"n"), Bytes::from_static(b"2")),
        ])
        .unwrap();
    nudge(&engine, 0);
    wait_for_l0_count(&engine, 1);

    let tables = engine.l0_tables();
    let table = &tables[0];
    assert_eq!(table.index.num_shards(), 2);
    assert_eq!(table.index.start_keys[0], Bytes::new());
    assert_eq!(table.index.start_keys[1], Bytes::from_static(b"m"));
    assert_eq!(table.index.end_key, Bytes::new());

    let shard0 = shardkv::shard_table::decode_shard_table(&table.read_shard_bytes(0).unwrap()).unwrap();
    let shard1 = shardkv::shard_table::decode_shard_table(&table.read_shard_bytes(1).unwrap()).unwrap();
    assert!(shard0[0].iter().any(|(k, _)| k == &Bytes::from_static(b"a")));
    assert!(shard1[0].iter().any(|(k, _)| k == &Bytes::from_static(b"n")));

    engine.close();
}

// Scenario 3 (switch mid-write): several batches that cumulatively exceed
// capacity must all be acknowledged and all be readable after the dust
// settles, whether still in a memtable or already flushed.
#[test]
fn scenario_3_switch_mid_write() {
    let dir = tempdir().unwrap();
    let mut config = small_buffer_config(dir.path());
    config.max_memtable_size = 100;
    let engine = Engine::open(config).unwrap();

    let batch = |tag: &str, n: usize| -> Vec<Entry> {
        (0..n)
            .map(|i| Entry::new(0, Bytes::from(format!("{tag}-{i}")), Bytes::from_static(b"v")))
            .collect()
    };

    engine.write(batch("b1", 8)).unwrap();
    engine.write(batch("b2", 8)).unwrap();
    engine.write(batch("b3", 9)).unwrap();
    nudge(&engine, 0);
    wait_for_l0_count(&engine, 1);

    let scanned = engine.scan_all(0).unwrap();
    for tag in ["b1", "b2", "b3"] {
        for i in 0..8 {
            let key = Bytes::from(format!("{tag}-{i}"));
            assert!(
                scanned.iter().any(|(k, _)| k == &key) || tag == "b3" && i == 8,
                "missing {tag}-{i}"
            );
        }
    }
    // b3 has 9 entries (0..=8); check the last one separately since the loop
    // above only covers indices shared by all three batches.
    assert!(scanned.iter().any(|(k, _)| k == &Bytes::from_static(b"b3-8")));

    engine.close();
}

// Scenario 4 (split serialization): a split submitted between two write
// batches on the same ingest channel must serialize between them, so the
// later batch's key lands in the shard created by the split.
#[test]
fn scenario_4_split_serialization() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(small_buffer_config(dir.path())).unwrap();

    let whole = engine.shard_map().get(b"x").clone();
    engine.write(vec![Entry::new(0, Bytes::from_static(b"a"), Bytes::from_static(b"1"))]).unwrap();
    engine
        .split(vec![SplitRequest {
            shard: whole,
            split_keys: vec![Bytes::from_static(b"m")],
        }])
        .unwrap();
    engine.write(vec![Entry::new(0, Bytes::from_static(b"n"), Bytes::from_static(b"2"))]).unwrap();
    nudge(&engine, 0);
    wait_for_l0_count(&engine, 1);

    let tables = engine.l0_tables();
    let table = &tables[0];
    assert_eq!(table.index.num_shards(), 2);
    let shard0 = shardkv::shard_table::decode_shard_table(&table.read_shard_bytes(0).unwrap()).unwrap();
    let shard1 = shardkv::shard_table::decode_shard_table(&table.read_shard_bytes(1).unwrap()).unwrap();
    assert!(shard0[0].iter().any(|(k, _)| k == &Bytes::from_static(b"a")));
    assert!(shard1[0].iter().any(|(k, _)| k == &Bytes::from_static(b"n")));

    engine.close();
}

// Scenario 6 (publish ordering): immediately after a flush, every key that
// was in the frozen memtable must be visible through the merge scan (which
// reads memtable stack ∪ L0 set) — it can never fall into the gap between
// the two.
#[test]
fn scenario_6_publish_ordering_no_gap() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(small_buffer_config(dir.path())).unwrap();

    let entries: Vec<Entry> = (0..30)
        .map(|i| Entry::new(0, Bytes::from(format!("row-{i:03}")), Bytes::from_static(b"v")))
        .collect();
    engine.write(entries.clone()).unwrap();
    nudge(&engine, 0);
    wait_for_l0_count(&engine, 1);

    let scanned = engine.scan_all(0).unwrap();
    for e in &entries {
        assert!(scanned.iter().any(|(k, _)| k == &e.key), "lost {:?} across publish", e.key);
    }

    engine.close();
}

#[test]
fn split_rejects_out_of_range_key() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(small_buffer_config(dir.path())).unwrap();
    let whole = engine.shard_map().get(b"x").clone();
    let err = engine
        .split(vec![SplitRequest {
            shard: whole,
            split_keys: vec![],
        }])
        .unwrap_err();
    assert!(matches!(err, shardkv::EngineError::Validation(_)));
    engine.close();
}

#[test]
fn write_rejects_out_of_range_cf_and_keeps_running() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(small_buffer_config(dir.path())).unwrap();

    let err = engine
        .write(vec![Entry::new(7, Bytes::from_static(b"k"), Bytes::from_static(b"v"))])
        .unwrap_err();
    assert!(matches!(err, shardkv::EngineError::Validation(_)));

    // The write-loop must still be alive: a well-formed write after the
    // rejected one succeeds and is later visible via scan.
    engine
        .write(vec![Entry::new(0, Bytes::from_static(b"k"), Bytes::from_static(b"v"))])
        .unwrap();
    let scanned = engine.scan_all(0).unwrap();
    assert!(scanned.iter().any(|(k, _)| k == b"k".as_slice()));

    engine.close();
}
