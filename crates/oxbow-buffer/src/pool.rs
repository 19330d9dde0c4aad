//! Buffer pool manager.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use sysinfo::System;

use crate::frame::{BufferFrame, FrameId};
use crate::replacer::{LruReplacer, Replacer};
use oxbow_common::page::{PageId, PAGE_SIZE};
use oxbow_common::{OxbowError, Result, StorageConfig};
use oxbow_storage::DiskManager;

/// Buffer pool manager.
///
/// Owns a fixed array of page frames, the page table mapping resident page
/// ids to frames, a free list, and the LRU replacer. One pool-wide latch
/// covers the page table, free list, and replacer for the duration of each
/// public call; page byte access goes through the per-frame page latch.
///
/// Every resident frame is in exactly one of three states: on the free
/// list (no page), pinned (in the page table, not evictable), or tracked
/// by the replacer (in the page table, pin count zero).
pub struct BufferPoolManager {
    /// Number of frames in the pool.
    pool_size: usize,
    /// The frame array.
    frames: Box<[BufferFrame]>,
    /// Page table and free list, behind the pool latch.
    inner: Mutex<PoolInner>,
    /// Eviction policy (internally synchronized; only called under the
    /// pool latch).
    replacer: LruReplacer,
    /// Backing page store.
    disk: Arc<DiskManager>,
}

struct PoolInner {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
}

impl BufferPoolManager {
    /// Creates a buffer pool with `config.buffer_pool_frames` frames.
    pub fn new(config: &StorageConfig, disk: Arc<DiskManager>) -> Self {
        log::debug!(
            "buffer pool: {} frames ({} bytes)",
            config.buffer_pool_frames,
            config.buffer_pool_size_bytes()
        );
        Self::with_pool_size(config.buffer_pool_frames, disk)
    }

    /// Creates a buffer pool sized to 25% of available system RAM,
    /// with a floor of 64 frames.
    pub fn auto_sized(disk: Arc<DiskManager>) -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let pool_size = (available_bytes / 4 / PAGE_SIZE).max(64);

        Self::with_pool_size(pool_size, disk)
    }

    fn with_pool_size(pool_size: usize, disk: Arc<DiskManager>) -> Self {
        let frames: Vec<_> = (0..pool_size)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();

        // Initially, every frame is in the free list.
        let free_list: VecDeque<_> = (0..pool_size).map(|i| FrameId(i as u32)).collect();

        Self {
            pool_size,
            frames: frames.into_boxed_slice(),
            inner: Mutex::new(PoolInner {
                page_table: HashMap::with_capacity(pool_size),
                free_list,
            }),
            replacer: LruReplacer::new(pool_size),
            disk,
        }
    }

    /// Returns the number of frames in the pool.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.inner.lock().free_list.len()
    }

    /// Returns the number of resident pages.
    pub fn page_count(&self) -> usize {
        self.inner.lock().page_table.len()
    }

    /// Returns true if the page is resident.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.inner.lock().page_table.contains_key(&page_id)
    }

    /// Returns the disk manager handle.
    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    /// Obtains a frame for a new resident page: free list first, then the
    /// replacer. Dirty victims are written back (prior page id captured
    /// first) before the frame is handed out. The returned frame still
    /// carries its old page id and page-table entry; the caller commits or
    /// surrenders it.
    fn acquire_frame(&self, inner: &mut PoolInner) -> Result<FrameId> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = self.replacer.victim() else {
            return Err(OxbowError::BufferPoolFull);
        };

        let frame = &self.frames[frame_id.0 as usize];
        let old_page_id = frame.page_id();
        if frame.is_dirty() && old_page_id.is_valid() {
            let data = frame.read_data();
            if let Err(e) = self.disk.write_page(old_page_id, &**data) {
                drop(data);
                // Put the victim back; it is still resident and dirty.
                self.replacer.unpin(frame_id);
                return Err(e);
            }
            frame.set_dirty(false);
            log::trace!("pool: wrote back evicted page {}", old_page_id);
        }

        Ok(frame_id)
    }

    /// Returns a frame obtained from `acquire_frame` without using it.
    fn surrender_frame(&self, inner: &mut PoolInner, frame_id: FrameId) {
        let frame = &self.frames[frame_id.0 as usize];
        if frame.page_id().is_valid() {
            self.replacer.unpin(frame_id);
        } else {
            inner.free_list.push_front(frame_id);
        }
    }

    /// Fetches a page, pinning it.
    ///
    /// If the page is not resident it is read from disk into a frame from
    /// the free list or, failing that, an evicted one. Returns
    /// `BufferPoolFull` when every frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<&BufferFrame> {
        if !page_id.is_valid() {
            return Err(OxbowError::InvalidPageId);
        }

        let mut inner = self.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            frame.pin();
            self.replacer.pin(frame_id);
            return Ok(frame);
        }

        let frame_id = self.acquire_frame(&mut inner)?;
        let frame = &self.frames[frame_id.0 as usize];

        let old_page_id = frame.page_id();
        if old_page_id.is_valid() {
            inner.page_table.remove(&old_page_id);
        }
        inner.page_table.insert(page_id, frame_id);

        frame.set_page_id(page_id);
        frame.set_dirty(false);
        frame.pin();

        {
            let mut data = frame.write_data();
            data.fill(0);
            if let Err(e) = self.disk.read_page(page_id, &mut data[..]) {
                drop(data);
                inner.page_table.remove(&page_id);
                frame.reset();
                inner.free_list.push_front(frame_id);
                return Err(e);
            }
        }

        Ok(frame)
    }

    /// Allocates a fresh page on disk and pins it in a frame.
    ///
    /// The returned frame's buffer is zero-filled; nothing is read from
    /// disk.
    pub fn new_page(&self) -> Result<&BufferFrame> {
        let mut inner = self.inner.lock();

        let frame_id = self.acquire_frame(&mut inner)?;
        let frame = &self.frames[frame_id.0 as usize];

        let page_id = match self.disk.allocate_page() {
            Ok(id) => id,
            Err(e) => {
                self.surrender_frame(&mut inner, frame_id);
                return Err(e);
            }
        };

        let old_page_id = frame.page_id();
        if old_page_id.is_valid() {
            inner.page_table.remove(&old_page_id);
        }
        inner.page_table.insert(page_id, frame_id);

        frame.set_page_id(page_id);
        frame.set_dirty(false);
        frame.pin();
        frame.write_data().fill(0);

        log::trace!("pool: allocated new page {}", page_id);
        Ok(frame)
    }

    /// Unpins a page, optionally marking it dirty.
    ///
    /// Returns false if the page is not resident or already unpinned. On
    /// the transition to pin count zero the frame becomes evictable.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let inner = self.inner.lock();

        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return false;
        };

        let frame = &self.frames[frame_id.0 as usize];
        if frame.pin_count() == 0 {
            return false;
        }

        if is_dirty {
            frame.set_dirty(true);
        }

        if frame.unpin() == 0 {
            self.replacer.unpin(frame_id);
        }
        true
    }

    /// Writes a resident page to disk and clears its dirty flag,
    /// regardless of pin count. Returns false if the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if !page_id.is_valid() {
            return Ok(false);
        }

        let inner = self.inner.lock();

        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return Ok(false);
        };

        let frame = &self.frames[frame_id.0 as usize];
        let data = frame.read_data();
        self.disk.write_page(page_id, &**data)?;
        frame.set_dirty(false);
        Ok(true)
    }

    /// Drops a resident page and deallocates it on disk.
    ///
    /// Returns true if the page is not resident (nothing to drop) or was
    /// dropped; false if it is pinned. Deallocation happens only after the
    /// pin-zero check.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut inner = self.inner.lock();

        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return true;
        };

        let frame = &self.frames[frame_id.0 as usize];
        if frame.pin_count() > 0 {
            return false;
        }

        self.disk.deallocate_page(page_id);
        inner.page_table.remove(&page_id);
        self.replacer.pin(frame_id);
        frame.reset();
        inner.free_list.push_back(frame_id);

        log::trace!("pool: deleted page {}", page_id);
        true
    }

    /// Writes every resident dirty page to disk and clears its dirty flag.
    pub fn flush_all_pages(&self) -> Result<()> {
        let inner = self.inner.lock();

        for (&page_id, &frame_id) in inner.page_table.iter() {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_dirty() {
                let data = frame.read_data();
                self.disk.write_page(page_id, &**data)?;
                frame.set_dirty(false);
            }
        }
        Ok(())
    }

    /// Fetches a page behind an RAII pin guard.
    pub fn fetch_page_pinned(&self, page_id: PageId) -> Result<PinnedPage<'_>> {
        let frame = self.fetch_page(page_id)?;
        Ok(PinnedPage {
            pool: self,
            frame,
            page_id,
            dirty: false,
        })
    }

    /// Allocates a new page behind an RAII pin guard.
    pub fn new_page_pinned(&self) -> Result<PinnedPage<'_>> {
        let frame = self.new_page()?;
        Ok(PinnedPage {
            pool: self,
            frame,
            page_id: frame.page_id(),
            dirty: false,
        })
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let inner = self.inner.lock();

        let mut pinned_frames = 0;
        let mut dirty_frames = 0;
        for &frame_id in inner.page_table.values() {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                pinned_frames += 1;
            }
            if frame.is_dirty() {
                dirty_frames += 1;
            }
        }

        BufferPoolStats {
            total_frames: self.pool_size,
            free_frames: inner.free_list.len(),
            used_frames: inner.page_table.len(),
            pinned_frames,
            dirty_frames,
        }
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of frames holding pages.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
}

/// RAII pin on a buffer page.
///
/// The pin is released on drop, on every exit path including panics. The
/// page latch is separate: callers latch through
/// [`BufferFrame::read_data`]/[`BufferFrame::write_data`] and must drop
/// those guards before (or together with) the pin.
pub struct PinnedPage<'a> {
    pool: &'a BufferPoolManager,
    frame: &'a BufferFrame,
    page_id: PageId,
    dirty: bool,
}

impl<'a> PinnedPage<'a> {
    /// Returns the pinned page's id.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the underlying frame.
    ///
    /// The reference carries the pool's lifetime, not the guard's, so page
    /// latch guards taken from it can be stored alongside this pin.
    pub fn frame(&self) -> &'a BufferFrame {
        self.frame
    }

    /// Marks the page dirty for the unpin at drop.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Returns whether the page will be unpinned dirty.
    pub fn is_marked_dirty(&self) -> bool {
        self.dirty
    }
}

impl Drop for PinnedPage<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page_id, self.dirty);
    }
}
