//! Record identifiers for OxbowDB.

use serde::{Deserialize, Serialize};

use crate::page::PageId;

/// Record identifier: the physical location of a tuple.
///
/// A `Rid` names a slot on a data page and is stored as the value in
/// B+ tree leaf entries. The index treats it as opaque.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Rid {
    /// Page the record lives on.
    pub page_id: i32,
    /// Slot number within that page.
    pub slot: u32,
}

impl Rid {
    /// Encoded size in bytes (page_id: i32 + slot: u32, little-endian).
    pub const ENCODED_LEN: usize = 8;

    /// Creates a new record identifier.
    pub fn new(page_id: i32, slot: u32) -> Self {
        Self { page_id, slot }
    }

    /// Returns the page id as a typed `PageId`.
    pub fn page(&self) -> PageId {
        PageId(self.page_id)
    }

    /// Serializes into `buf`, which must be at least `ENCODED_LEN` bytes.
    pub fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.page_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.slot.to_le_bytes());
    }

    /// Deserializes from `buf`, which must be at least `ENCODED_LEN` bytes.
    pub fn decode(buf: &[u8]) -> Self {
        let page_id = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let slot = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        Self { page_id, slot }
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot)
    }
}
