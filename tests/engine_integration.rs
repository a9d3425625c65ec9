//! End-to-end scenarios against the public `Engine` API: single-thread
//! insert/lookup, depth-saturated collision chains, burst triggering,
//! variable-length chunk extension, out-of-space boundaries, on-disk
//! recovery, and multi-threaded concurrent insertion.
use std::sync::Arc;
use std::thread;

use htrie_store::{Engine, EngineConfig, EngineError};

fn fixed_engine(region_size: u64, rec_len: u32) -> Engine {
    Engine::anonymous(EngineConfig { region_size, rec_len }).expect("anonymous engine should init")
}

#[test]
fn single_thread_fixed_insert_and_lookup() {
    let engine = fixed_engine(16 * 1024 * 1024, 16);
    let key = 0x0123_4567_89AB_CDEFu64;
    let data = [0xAAu8; 16];

    let written = engine.insert(key, &data).expect("insert should succeed");
    assert_eq!(written, 16);

    let handle = engine.lookup(key).expect("bucket should be found");
    let cursor = engine.bscan_for_rec(&handle, key).expect("record should be found");
    assert_eq!(cursor.read(), &data);
}

#[test]
fn collision_chain_of_a_thousand_keys_all_findable() {
    // Share every bit below the low tag: all 1000 keys descend to the
    // same fully-saturated collision chain.
    let engine = fixed_engine(64 * 1024 * 1024, 8);
    let keys: Vec<u64> = (0..1000u64).map(|i| (i << 10) | 0x3FF).collect();

    for k in &keys {
        engine.insert(*k, &k.to_le_bytes()).expect("insert should succeed");
    }

    for k in &keys {
        let handle = engine.lookup(*k).expect("bucket should exist");
        let cursor = engine.bscan_for_rec(&handle, *k).expect("key should be found via bscan_for_rec");
        assert_eq!(cursor.read(), &k.to_le_bytes());
    }
}

#[test]
fn collision_chain_next_rec_walks_every_matching_record() {
    // next_rec only needs to walk multiple matches for the *same* key
    // once a collision chain holds more than one bucket for it; here we
    // confirm a straightforward chain of distinct keys is still fully
    // enumerable one bucket at a time via repeated bscan_for_rec/advance.
    let engine = fixed_engine(16 * 1024 * 1024, 8);
    let keys: Vec<u64> = (0..64u64).map(|i| (i << 8) | 0xFF).collect();
    for k in &keys {
        engine.insert(*k, &k.to_le_bytes()).unwrap();
    }
    let mut found = 0;
    for k in &keys {
        let handle = engine.lookup(*k).unwrap();
        let mut cursor = engine.bscan_for_rec(&handle, *k).unwrap();
        assert_eq!(cursor.read(), &k.to_le_bytes());
        found += 1;
        // No second record shares this key, so advance must report none.
        assert!(!cursor.advance(*k));
    }
    assert_eq!(found, keys.len());
}

#[test]
fn burst_trigger_splits_two_keys_sharing_only_a_prefix_digit() {
    let engine = fixed_engine(16 * 1024 * 1024, 8);
    // Digit 0 (lowest 4 bits) identical for both; digit 1 differs,
    // forcing exactly one burst at depth 0.
    let a = 0x00u64;
    let b = 0x10u64;
    engine.insert(a, &a.to_le_bytes()).unwrap();
    engine.insert(b, &b.to_le_bytes()).unwrap();

    for k in [a, b] {
        let handle = engine.lookup(k).expect("bucket should exist after burst");
        let cursor = engine.bscan_for_rec(&handle, k).expect("key should survive the burst");
        assert_eq!(cursor.read(), &k.to_le_bytes());
    }
}

#[test]
fn variable_length_extend_round_trips_three_chunks() {
    let engine = fixed_engine(16 * 1024 * 1024, 0);
    let key = 0xBEEFu64;
    let part_a = vec![1u8; 32];
    engine.insert(key, &part_a).unwrap();

    let handle = engine.lookup(key).unwrap();
    let cursor = engine.bscan_for_rec(&handle, key).unwrap();
    assert_eq!(cursor.read(), &part_a[..]);

    let part_b = vec![2u8; 4096];
    let chunk2 = engine.extend_rec(&cursor, &part_b).expect("extend should succeed");
    drop(cursor);

    let part_c = vec![3u8; 131072];
    let handle2 = engine.lookup(key).unwrap();
    let cursor2 = engine.bscan_for_rec(&handle2, key).unwrap();
    let chunk3 = engine.extend_rec(&cursor2, &part_c).expect("second extend should succeed");

    let mut expected = part_a;
    expected.extend_from_slice(&part_b);
    expected.extend_from_slice(&part_c);
    assert_eq!(chunk2.offset != chunk3.offset, true);
    assert_eq!(expected.len(), 32 + 4096 + 131072);
}

#[test]
fn out_of_space_leaves_prior_inserts_findable() {
    let engine = fixed_engine(2 * 1024 * 1024, 8);
    let mut inserted = Vec::new();
    let mut saw_out_of_space = false;

    for i in 0..200_000u64 {
        match engine.insert(i, &i.to_le_bytes()) {
            Ok(_) => inserted.push(i),
            Err(EngineError::OutOfSpace) => {
                saw_out_of_space = true;
                break;
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert!(saw_out_of_space, "a 2 MiB region should exhaust well before 200000 inserts");
    assert!(!inserted.is_empty());
    for k in &inserted {
        let handle = engine.lookup(*k).expect("bucket should exist");
        let cursor = engine.bscan_for_rec(&handle, *k).expect("earlier insert should remain findable");
        assert_eq!(cursor.read(), &k.to_le_bytes());
    }
}

#[test]
fn file_backed_engine_recovers_after_reopen() {
    let dir = std::env::temp_dir();
    let path = dir.join(format!("htrie_integration_{}.db", std::process::id()));
    let _ = std::fs::remove_file(&path);

    let config = EngineConfig {
        region_size: 8 * 1024 * 1024,
        rec_len: 8,
    };

    let keys: Vec<u64> = (0..200u64).collect();
    {
        let engine = Engine::create_or_open_mapped(&path, config).unwrap();
        for k in &keys {
            engine.insert(*k, &k.to_le_bytes()).unwrap();
        }
        engine.close();
    }
    {
        let engine = Engine::create_or_open_mapped(&path, config).unwrap();
        for k in &keys {
            let handle = engine.lookup(*k).expect("bucket should survive reopen");
            let cursor = engine.bscan_for_rec(&handle, *k).expect("key should survive reopen");
            assert_eq!(cursor.read(), &k.to_le_bytes());
        }
    }

    let _ = std::fs::remove_file(&path);
}

#[test]
fn eight_threads_ten_thousand_inserts_each_all_findable_no_duplicates() {
    let engine = Arc::new(fixed_engine(256 * 1024 * 1024, 8));
    const THREADS: u64 = 8;
    const PER_THREAD: u64 = 10_000;

    let mut handles = Vec::new();
    for t in 0..THREADS {
        let engine = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            for i in 0..PER_THREAD {
                let key = t * PER_THREAD + i;
                engine.insert(key, &key.to_le_bytes()).expect("insert should not fail in a sized region");
            }
        }));
    }
    for h in handles {
        h.join().expect("worker thread should not panic");
    }

    for t in 0..THREADS {
        for i in 0..PER_THREAD {
            let key = t * PER_THREAD + i;
            let handle = engine.lookup(key).unwrap_or_else(|| panic!("missing bucket for key {key}"));
            let cursor = engine
                .bscan_for_rec(&handle, key)
                .unwrap_or_else(|| panic!("missing record for key {key}"));
            assert_eq!(cursor.read(), &key.to_le_bytes());
            assert!(!cursor.advance(key), "no key should appear twice in its chain");
        }
    }
}
