//! Disk manager for page-level file I/O.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use oxbow_common::page::{PageId, PAGE_SIZE};
use oxbow_common::{OxbowError, Result, StorageConfig};

/// Manages reading and writing pages in a single data file.
///
/// Page ids are dense file offsets (`page_id * PAGE_SIZE`). Page 0 is
/// reserved for the header page and is allocated when the file is created,
/// so `allocate_page` never hands it out. Deallocated pages go on a free
/// list and are reused by later allocations; the file is never truncated.
pub struct DiskManager {
    /// Configuration.
    config: StorageConfig,
    /// File handle and allocation state.
    inner: Mutex<DiskInner>,
}

struct DiskInner {
    /// The data file.
    file: File,
    /// Number of pages the file spans.
    num_pages: i32,
    /// Deallocated page ids available for reuse.
    free_pages: Vec<PageId>,
}

impl DiskManager {
    /// Opens (or creates) the data file named by the configuration.
    ///
    /// A freshly created file gets a zeroed page 0 for the header. The
    /// configured page size must match the compiled-in `PAGE_SIZE`.
    pub fn new(config: StorageConfig) -> Result<Self> {
        if config.page_size != PAGE_SIZE {
            return Err(OxbowError::ConfigError(format!(
                "page_size {} does not match the on-disk layout ({})",
                config.page_size, PAGE_SIZE
            )));
        }

        if let Some(dir) = config.data_path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&config.data_path)?;

        let file_size = file.metadata()?.len();
        let mut num_pages = (file_size / PAGE_SIZE as u64) as i32;

        if num_pages == 0 {
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&[0u8; PAGE_SIZE])?;
            if config.fsync_enabled {
                file.sync_all()?;
            }
            num_pages = 1;
        }

        Ok(Self {
            config,
            inner: Mutex::new(DiskInner {
                file,
                num_pages,
                free_pages: Vec::new(),
            }),
        })
    }

    /// Returns the data file path.
    pub fn data_path(&self) -> &Path {
        &self.config.data_path
    }

    /// Reads a page from disk into `buf`, which must be `PAGE_SIZE` bytes.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        if !page_id.is_valid() {
            return Err(OxbowError::InvalidPageId);
        }

        let mut inner = self.inner.lock();
        if page_id.0 >= inner.num_pages {
            return Err(OxbowError::PageNotFound { page_id });
        }

        inner.file.seek(SeekFrom::Start(page_id.file_offset()))?;
        inner.file.read_exact(&mut buf[..PAGE_SIZE])?;
        Ok(())
    }

    /// Writes a page to disk from `buf`, which must be `PAGE_SIZE` bytes.
    pub fn write_page(&self, page_id: PageId, buf: &[u8]) -> Result<()> {
        if !page_id.is_valid() {
            return Err(OxbowError::InvalidPageId);
        }

        let mut inner = self.inner.lock();
        if page_id.0 >= inner.num_pages {
            return Err(OxbowError::PageNotFound { page_id });
        }

        inner.file.seek(SeekFrom::Start(page_id.file_offset()))?;
        inner.file.write_all(&buf[..PAGE_SIZE])?;

        if self.config.fsync_enabled {
            inner.file.sync_all()?;
        }
        Ok(())
    }

    /// Allocates a page, reusing a deallocated one when available.
    ///
    /// Newly extended pages are written out zeroed so subsequent reads
    /// always see a full page.
    pub fn allocate_page(&self) -> Result<PageId> {
        let mut inner = self.inner.lock();

        if let Some(page_id) = inner.free_pages.pop() {
            log::trace!("disk: reusing deallocated page {}", page_id);
            return Ok(page_id);
        }

        let page_id = PageId(inner.num_pages);
        inner.file.seek(SeekFrom::Start(page_id.file_offset()))?;
        inner.file.write_all(&[0u8; PAGE_SIZE])?;

        if self.config.fsync_enabled {
            inner.file.sync_all()?;
        }

        inner.num_pages += 1;
        Ok(page_id)
    }

    /// Returns a page to the allocator for reuse.
    ///
    /// The page's bytes are left in place; callers must not read a
    /// deallocated page until it is reallocated and rewritten.
    pub fn deallocate_page(&self, page_id: PageId) {
        if !page_id.is_valid() || page_id == oxbow_common::HEADER_PAGE_ID {
            return;
        }

        let mut inner = self.inner.lock();
        if page_id.0 < inner.num_pages && !inner.free_pages.contains(&page_id) {
            inner.free_pages.push(page_id);
        }
    }

    /// Returns the number of pages the data file spans.
    pub fn num_pages(&self) -> i32 {
        self.inner.lock().num_pages
    }

    /// Flushes pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.inner.lock().file.sync_all();
    }
}
