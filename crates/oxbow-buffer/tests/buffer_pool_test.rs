//! Buffer pool integration tests.

use std::sync::Arc;

use oxbow_buffer::BufferPoolManager;
use oxbow_common::page::{PageId, PAGE_SIZE};
use oxbow_common::{OxbowError, StorageConfig};
use oxbow_storage::DiskManager;
use tempfile::tempdir;

fn create_pool(pool_size: usize) -> (BufferPoolManager, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let config = StorageConfig {
        data_path: dir.path().join("pool.db"),
        buffer_pool_frames: pool_size,
        fsync_enabled: false,
        ..Default::default()
    };
    let disk = Arc::new(DiskManager::new(config.clone()).unwrap());
    (BufferPoolManager::new(&config, disk), dir)
}

#[test]
fn test_pool_fills_then_rejects_then_recovers() {
    let (pool, _dir) = create_pool(10);

    // Fill every frame with a pinned new page
    let mut page_ids = Vec::new();
    for _ in 0..10 {
        let frame = pool.new_page().unwrap();
        assert_eq!(frame.pin_count(), 1);
        page_ids.push(frame.page_id());
    }

    // An eleventh allocation finds no evictable frame
    assert!(matches!(pool.new_page(), Err(OxbowError::BufferPoolFull)));

    // Unpin any one page; the next allocation succeeds in its frame
    assert!(pool.unpin_page(page_ids[5], false));
    let frame = pool.new_page().unwrap();
    assert_eq!(frame.pin_count(), 1);
    assert!(!pool.contains(page_ids[5]));
}

#[test]
fn test_pool_write_survives_eviction() {
    let (pool, _dir) = create_pool(2);

    // Write a recognizable pattern into one page
    let target = {
        let frame = pool.new_page().unwrap();
        let id = frame.page_id();
        {
            let mut data = frame.write_data();
            for (i, byte) in data.iter_mut().enumerate().take(64) {
                *byte = (i % 251) as u8;
            }
        }
        pool.unpin_page(id, true);
        id
    };

    // Churn enough pages through the pool to force the target out
    for _ in 0..4 {
        let frame = pool.new_page().unwrap();
        let id = frame.page_id();
        pool.unpin_page(id, false);
    }
    assert!(!pool.contains(target));

    // Fetch brings the written-back bytes home
    let frame = pool.fetch_page(target).unwrap();
    let data = frame.read_data();
    for i in 0..64 {
        assert_eq!(data[i], (i % 251) as u8);
    }
}

#[test]
fn test_pool_balanced_pin_unpin_leaves_all_evictable() {
    let (pool, _dir) = create_pool(8);

    let mut ids = Vec::new();
    for _ in 0..8 {
        ids.push(pool.new_page().unwrap().page_id());
    }

    // Pin each page a few more times, then unpin everything
    for &id in &ids {
        pool.fetch_page(id).unwrap();
        pool.fetch_page(id).unwrap();
    }
    for &id in &ids {
        for _ in 0..3 {
            assert!(pool.unpin_page(id, false));
        }
        // One more than was pinned: rejected
        assert!(!pool.unpin_page(id, false));
    }

    assert_eq!(pool.stats().pinned_frames, 0);

    // Every frame is now evictable: 8 fresh pages all succeed
    for _ in 0..8 {
        let frame = pool.new_page().unwrap();
        pool.unpin_page(frame.page_id(), false);
    }
}

#[test]
fn test_pool_delete_returns_frame_to_free_list() {
    let (pool, _dir) = create_pool(4);

    let id = pool.new_page().unwrap().page_id();
    assert!(!pool.delete_page(id)); // pinned

    pool.unpin_page(id, true);
    assert!(pool.delete_page(id));
    assert_eq!(pool.free_count(), 4);
    assert!(!pool.contains(id));
}

#[test]
fn test_pool_flush_makes_bytes_durable_without_unpin() {
    let (pool, _dir) = create_pool(4);

    let frame = pool.new_page().unwrap();
    let id = frame.page_id();
    frame.write_data()[0] = 0x7E;
    frame.set_dirty(true);

    // Flush works while the page is still pinned
    assert!(pool.flush_page(id).unwrap());
    assert!(!frame.is_dirty());

    let mut buf = [0u8; PAGE_SIZE];
    pool.disk().read_page(id, &mut buf).unwrap();
    assert_eq!(buf[0], 0x7E);

    pool.unpin_page(id, false);
}

#[test]
fn test_pool_fetch_invalid_and_missing() {
    let (pool, _dir) = create_pool(4);

    assert!(matches!(
        pool.fetch_page(PageId::INVALID),
        Err(OxbowError::InvalidPageId)
    ));
    assert!(matches!(
        pool.fetch_page(PageId(12345)),
        Err(OxbowError::PageNotFound { .. })
    ));
}

#[test]
fn test_pool_concurrent_fetch_unpin() {
    let (pool, _dir) = create_pool(16);
    let pool = Arc::new(pool);

    let mut ids = Vec::new();
    for _ in 0..8 {
        let frame = pool.new_page().unwrap();
        ids.push(frame.page_id());
        pool.unpin_page(frame.page_id(), false);
    }
    let ids = Arc::new(ids);

    let mut handles = Vec::new();
    for t in 0..4 {
        let pool = Arc::clone(&pool);
        let ids = Arc::clone(&ids);
        handles.push(std::thread::spawn(move || {
            for round in 0..200 {
                let id = ids[(t + round) % ids.len()];
                let frame = pool.fetch_page(id).unwrap();
                assert_eq!(frame.page_id(), id);
                assert!(pool.unpin_page(id, false));
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // Matched fetch/unpin counts: everything unpinned again
    assert_eq!(pool.stats().pinned_frames, 0);
}
