//! Page identifiers and constants for OxbowDB storage.

use serde::{Deserialize, Serialize};

/// Page size in bytes (4 KB).
pub const PAGE_SIZE: usize = 4096;

/// Unique identifier for a page within the data file.
///
/// Page ids are dense, starting at 0. Page 0 is reserved for the header
/// page, which maps index names to root page ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub i32);

/// The reserved header page, holding index name to root page id records.
pub const HEADER_PAGE_ID: PageId = PageId(0);

impl PageId {
    /// Sentinel for an unassigned page id.
    pub const INVALID: PageId = PageId(-1);

    /// Returns true if this is a valid (assigned) page id.
    pub fn is_valid(&self) -> bool {
        self.0 >= 0
    }

    /// Returns the byte offset of this page within the data file.
    pub fn file_offset(&self) -> u64 {
        self.0 as u64 * PAGE_SIZE as u64
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_constant() {
        assert_eq!(PAGE_SIZE, 4096);
    }

    #[test]
    fn test_page_id_validity() {
        assert!(PageId(0).is_valid());
        assert!(PageId(1000).is_valid());
        assert!(!PageId::INVALID.is_valid());
        assert!(!PageId(-7).is_valid());
    }

    #[test]
    fn test_header_page_id() {
        assert_eq!(HEADER_PAGE_ID, PageId(0));
        assert!(HEADER_PAGE_ID.is_valid());
    }

    #[test]
    fn test_file_offset() {
        assert_eq!(PageId(0).file_offset(), 0);
        assert_eq!(PageId(1).file_offset(), PAGE_SIZE as u64);
        assert_eq!(PageId(10).file_offset(), 10 * PAGE_SIZE as u64);
    }

    #[test]
    fn test_page_id_display() {
        assert_eq!(PageId(5).to_string(), "5");
        assert_eq!(PageId::INVALID.to_string(), "-1");
    }

    #[test]
    fn test_page_id_ordering() {
        assert!(PageId::INVALID < PageId(0));
        assert!(PageId(1) < PageId(2));
    }

    #[test]
    fn test_page_id_hash() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(PageId(1));
        set.insert(PageId(2));
        set.insert(PageId(1));

        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_page_id_serde_roundtrip() {
        let original = PageId(500);
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: PageId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original, deserialized);
    }
}
