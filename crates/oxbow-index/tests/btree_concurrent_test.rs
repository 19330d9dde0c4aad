//! B+ tree integration tests, multi-threaded.

use std::sync::Arc;
use std::thread;

use oxbow_buffer::BufferPoolManager;
use oxbow_common::{Rid, StorageConfig};
use oxbow_index::{BPlusTree, GenericComparator, GenericKey, Transaction};
use oxbow_storage::DiskManager;
use tempfile::tempdir;

type Key = GenericKey<8>;
type Tree = BPlusTree<Key, GenericComparator>;

fn key(v: i64) -> Key {
    Key::from_i64(v)
}

fn rid(v: i64) -> Rid {
    Rid::new((v >> 32) as i32, v as u32)
}

fn create_tree(
    pool_size: usize,
    leaf_max: i32,
    internal_max: i32,
) -> (Arc<Tree>, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let config = StorageConfig {
        data_path: dir.path().join("concurrent.db"),
        buffer_pool_frames: pool_size,
        fsync_enabled: false,
        ..Default::default()
    };
    let disk = Arc::new(DiskManager::new(config.clone()).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(&config, disk));
    let tree = Tree::new("concurrent", bpm, GenericComparator, leaf_max, internal_max).unwrap();
    (Arc::new(tree), dir)
}

/// Runs `op` on `num_threads` threads, handing each its thread index.
fn launch_parallel(num_threads: usize, op: impl Fn(usize) + Send + Sync + 'static) {
    let op = Arc::new(op);
    let mut handles = Vec::with_capacity(num_threads);
    for thread_index in 0..num_threads {
        let op = Arc::clone(&op);
        handles.push(thread::spawn(move || op(thread_index)));
    }
    for handle in handles {
        handle.join().unwrap();
    }
}

fn insert_split_by_parity(tree: &Tree, keys: &[i64], total_threads: usize, thread_index: usize) {
    let mut txn = Transaction::new();
    for &v in keys {
        if v as usize % total_threads == thread_index {
            tree.insert(key(v), rid(v), &mut txn).unwrap();
        }
    }
}

fn remove_split_by_parity(tree: &Tree, keys: &[i64], total_threads: usize, thread_index: usize) {
    let mut txn = Transaction::new();
    for &v in keys {
        if v as usize % total_threads == thread_index {
            tree.remove(&key(v), &mut txn).unwrap();
        }
    }
}

#[test]
fn test_concurrent_remove_then_scan() {
    let (tree, _dir) = create_tree(256, 3, 3);

    {
        let mut txn = Transaction::new();
        for v in 1..=10 {
            tree.insert(key(v), rid(v), &mut txn).unwrap();
        }
    }

    let to_remove = vec![1i64, 4, 3, 2, 5, 6];
    let tree_for_threads = Arc::clone(&tree);
    launch_parallel(2, move |thread_index| {
        remove_split_by_parity(&tree_for_threads, &to_remove, 2, thread_index);
    });

    let slots: Vec<u32> = tree
        .begin_at(&key(7))
        .unwrap()
        .map(|(_, rid)| rid.slot)
        .collect();
    assert_eq!(slots, vec![7, 8, 9, 10]);

    for v in 1..=6 {
        assert_eq!(tree.get_value(&key(v)).unwrap(), None);
    }
}

#[test]
fn test_concurrent_insert_then_scan() {
    let (tree, _dir) = create_tree(256, 3, 3);

    let keys: Vec<i64> = (1..=100).collect();
    let tree_for_threads = Arc::clone(&tree);
    launch_parallel(2, move |thread_index| {
        insert_split_by_parity(&tree_for_threads, &keys, 2, thread_index);
    });

    for v in 1..=100 {
        assert_eq!(tree.get_value(&key(v)).unwrap(), Some(rid(v)), "key {}", v);
    }

    let scanned: Vec<i64> = tree.begin().unwrap().map(|(k, _)| k.to_i64()).collect();
    assert_eq!(scanned, (1..=100).collect::<Vec<i64>>());
}

#[test]
fn test_concurrent_inserts_interleaved_with_reads() {
    let (tree, _dir) = create_tree(256, 4, 4);

    let tree_for_threads = Arc::clone(&tree);
    launch_parallel(4, move |thread_index| {
        let mut txn = Transaction::new();
        for v in 1..=200i64 {
            if v as usize % 4 == thread_index {
                tree_for_threads.insert(key(v), rid(v), &mut txn).unwrap();
                // Own writes are immediately visible
                assert_eq!(
                    tree_for_threads.get_value(&key(v)).unwrap(),
                    Some(rid(v))
                );
            } else {
                // Reads race with other writers and may see either state
                let _ = tree_for_threads.get_value(&key(v)).unwrap();
            }
        }
    });

    let scanned: Vec<i64> = tree.begin().unwrap().map(|(k, _)| k.to_i64()).collect();
    assert_eq!(scanned, (1..=200).collect::<Vec<i64>>());
}

#[test]
fn test_concurrent_mixed_workload_then_drain() {
    let (tree, _dir) = create_tree(2048, 3, 3);
    const THREADS: usize = 100;
    const KEYS: i64 = 50;

    let tree_for_threads = Arc::clone(&tree);
    launch_parallel(THREADS, move |thread_index| {
        let mut txn = Transaction::new();
        for round in 0..3 {
            for v in 1..=KEYS {
                // Every thread churns the same key set; duplicates and
                // absent keys are expected outcomes, not errors
                tree_for_threads.insert(key(v), rid(v), &mut txn).unwrap();
                if let Some(found) = tree_for_threads.get_value(&key(v)).unwrap() {
                    assert_eq!(found, rid(v));
                }
                if (v as usize + round + thread_index) % 2 == 0 {
                    tree_for_threads.remove(&key(v), &mut txn).unwrap();
                }
            }
        }
    });

    // Whatever survived, any present key still maps to its own rid
    for v in 1..=KEYS {
        if let Some(found) = tree.get_value(&key(v)).unwrap() {
            assert_eq!(found, rid(v));
        }
    }

    // A single-threaded removal of every key drains the tree
    let mut txn = Transaction::new();
    for v in 1..=KEYS {
        tree.remove(&key(v), &mut txn).unwrap();
    }
    assert!(tree.is_empty());
    assert!(tree.begin().unwrap() == tree.end());
}

#[test]
fn test_concurrent_insert_remove_disjoint_ranges() {
    let (tree, _dir) = create_tree(512, 4, 4);

    // Prefill a range that removers will drain while inserters grow
    // another
    {
        let mut txn = Transaction::new();
        for v in 1..=100 {
            tree.insert(key(v), rid(v), &mut txn).unwrap();
        }
    }

    let tree_for_threads = Arc::clone(&tree);
    launch_parallel(4, move |thread_index| {
        let mut txn = Transaction::new();
        if thread_index % 2 == 0 {
            for v in 1..=100i64 {
                if (v as usize / 2) % 2 == thread_index / 2 {
                    tree_for_threads.remove(&key(v), &mut txn).unwrap();
                }
            }
        } else {
            for v in 101..=200i64 {
                if (v as usize / 2) % 2 == thread_index / 2 {
                    tree_for_threads.insert(key(v), rid(v), &mut txn).unwrap();
                }
            }
        }
    });

    // The two removers' buckets cover all of 1..=100 and the two
    // inserters' buckets cover all of 101..=200
    let scanned: Vec<i64> = tree.begin().unwrap().map(|(k, _)| k.to_i64()).collect();
    assert_eq!(scanned, (101..=200).collect::<Vec<i64>>());
}
