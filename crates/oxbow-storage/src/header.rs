//! Header page layout: index name to root page id records.
//!
//! Page 0 of the data file holds a flat record table mapping each index
//! name to its current root page id. The B+ tree rewrites its record
//! through this view whenever the root changes.
//!
//! Layout (little-endian):
//!
//! ```text
//! +--------------------+ 0
//! | record_count: u32  | 4
//! +--------------------+
//! | name: [u8; 32]     |      record 0
//! | root_page_id: i32  |
//! +--------------------+
//! | ...                |
//! +--------------------+
//! ```

use oxbow_common::page::{PageId, PAGE_SIZE};

/// Maximum length of an index name, NUL-padded inside a record.
pub const MAX_INDEX_NAME_LEN: usize = 32;

/// Bytes per record: fixed-width name + root page id.
const RECORD_LEN: usize = MAX_INDEX_NAME_LEN + 4;

/// Byte offset of the first record.
const RECORDS_START: usize = 4;

/// Maximum number of records one header page can hold.
pub const MAX_HEADER_RECORDS: usize = (PAGE_SIZE - RECORDS_START) / RECORD_LEN;

/// View over the header page bytes.
///
/// Generic over the borrow: `&[u8]` for read-only access,
/// `&mut [u8]` when records are modified.
pub struct HeaderPageView<B> {
    data: B,
}

impl<B: AsRef<[u8]>> HeaderPageView<B> {
    /// Wraps a header page buffer.
    pub fn new(data: B) -> Self {
        Self { data }
    }

    /// Number of records currently stored.
    pub fn record_count(&self) -> usize {
        let d = self.data.as_ref();
        u32::from_le_bytes([d[0], d[1], d[2], d[3]]) as usize
    }

    /// Looks up the root page id recorded for `name`.
    pub fn get_record(&self, name: &str) -> Option<PageId> {
        let index = self.find_record(name)?;
        let d = self.data.as_ref();
        let off = RECORDS_START + index * RECORD_LEN + MAX_INDEX_NAME_LEN;
        Some(PageId(i32::from_le_bytes([
            d[off],
            d[off + 1],
            d[off + 2],
            d[off + 3],
        ])))
    }

    fn find_record(&self, name: &str) -> Option<usize> {
        if name.len() >= MAX_INDEX_NAME_LEN {
            return None;
        }

        let d = self.data.as_ref();
        let count = self.record_count();
        for i in 0..count {
            let off = RECORDS_START + i * RECORD_LEN;
            let stored = &d[off..off + MAX_INDEX_NAME_LEN];
            let stored_len = stored.iter().position(|&b| b == 0).unwrap_or(MAX_INDEX_NAME_LEN);
            if &stored[..stored_len] == name.as_bytes() {
                return Some(i);
            }
        }
        None
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> HeaderPageView<B> {
    fn set_record_count(&mut self, count: usize) {
        self.data.as_mut()[0..4].copy_from_slice(&(count as u32).to_le_bytes());
    }

    fn write_record(&mut self, index: usize, name: &str, root_page_id: PageId) {
        let off = RECORDS_START + index * RECORD_LEN;
        let d = self.data.as_mut();
        d[off..off + MAX_INDEX_NAME_LEN].fill(0);
        d[off..off + name.len()].copy_from_slice(name.as_bytes());
        d[off + MAX_INDEX_NAME_LEN..off + RECORD_LEN]
            .copy_from_slice(&root_page_id.0.to_le_bytes());
    }

    /// Inserts a new record. Returns false if the name is already present,
    /// too long, or the page is full.
    pub fn insert_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        if name.is_empty() || name.len() >= MAX_INDEX_NAME_LEN {
            return false;
        }
        if self.find_record(name).is_some() {
            return false;
        }

        let count = self.record_count();
        if count >= MAX_HEADER_RECORDS {
            return false;
        }

        self.write_record(count, name, root_page_id);
        self.set_record_count(count + 1);
        true
    }

    /// Updates an existing record. Returns false if the name is absent.
    pub fn update_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        match self.find_record(name) {
            Some(index) => {
                let off = RECORDS_START + index * RECORD_LEN + MAX_INDEX_NAME_LEN;
                self.data.as_mut()[off..off + 4].copy_from_slice(&root_page_id.0.to_le_bytes());
                true
            }
            None => false,
        }
    }

    /// Deletes a record, compacting the table. Returns false if absent.
    pub fn delete_record(&mut self, name: &str) -> bool {
        let Some(index) = self.find_record(name) else {
            return false;
        };

        let count = self.record_count();
        let d = self.data.as_mut();
        let from = RECORDS_START + (index + 1) * RECORD_LEN;
        let to = RECORDS_START + count * RECORD_LEN;
        d.copy_within(from..to, RECORDS_START + index * RECORD_LEN);

        let last = RECORDS_START + (count - 1) * RECORD_LEN;
        d[last..last + RECORD_LEN].fill(0);

        self.set_record_count(count - 1);
        true
    }
}
