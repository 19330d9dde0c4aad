//! B+ tree node page layouts (leaf and internal).
//!
//! Tree pages are plain byte buffers owned by the buffer pool; this module
//! provides typed views over them, discriminated by the `page_type` header
//! field. Views are generic over the borrow so the same code serves read
//! guards (`&[u8]`) and write guards (`&mut [u8]`).
//!
//! Header layout, shared by both node kinds (little-endian):
//!
//! ```text
//! +---------------------+ 0
//! | page_type: u32      | 4
//! | lsn: u32            | 8
//! | size: i32           | 12
//! | max_size: i32       | 16
//! | parent_page_id: i32 | 20
//! | self_page_id: i32   | 24
//! +---------------------+
//! | next_page_id: i32   | 28   (leaf pages only)
//! +---------------------+
//! | entry array ...     |
//! +---------------------+
//! ```
//!
//! Leaf entries are `key + rid`; internal entries are `key + child page id`,
//! where the key at index 0 is an unused sentinel. Both layouts reserve
//! slack beyond `max_size`: nodes overflow transiently before a split, and
//! a coalesced node can sit one entry past its declared capacity.

use std::marker::PhantomData;

use crate::key::{IndexKey, KeyComparator};
use oxbow_buffer::BufferPoolManager;
use oxbow_common::page::{PageId, PAGE_SIZE};
use oxbow_common::{Result, Rid};

/// Shared header length in bytes.
pub const NODE_HEADER_LEN: usize = 24;

/// Leaf header length (shared header + next pointer).
pub const LEAF_HEADER_LEN: usize = 28;

const OFF_PAGE_TYPE: usize = 0;
const OFF_LSN: usize = 4;
const OFF_SIZE: usize = 8;
const OFF_MAX_SIZE: usize = 12;
const OFF_PARENT: usize = 16;
const OFF_SELF: usize = 20;
const OFF_NEXT: usize = 24;

/// Serialized width of a child page id in internal entries.
const CHILD_ID_LEN: usize = 4;

/// Discriminant stored in the `page_type` header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum NodeType {
    /// Uninitialized page.
    Invalid = 0,
    /// Leaf node holding `(key, rid)` entries.
    Leaf = 1,
    /// Internal node holding `(key, child page id)` entries.
    Internal = 2,
}

impl NodeType {
    fn from_u32(value: u32) -> NodeType {
        match value {
            1 => NodeType::Leaf,
            2 => NodeType::Internal,
            _ => NodeType::Invalid,
        }
    }
}

/// Number of leaf entries a page can physically hold.
pub fn leaf_capacity<K: IndexKey>() -> usize {
    (PAGE_SIZE - LEAF_HEADER_LEN) / (K::ENCODED_LEN + Rid::ENCODED_LEN)
}

/// Number of internal entries a page can physically hold.
pub fn internal_capacity<K: IndexKey>() -> usize {
    (PAGE_SIZE - NODE_HEADER_LEN) / (K::ENCODED_LEN + CHILD_ID_LEN)
}

fn get_u32(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

fn put_u32(data: &mut [u8], off: usize, value: u32) {
    data[off..off + 4].copy_from_slice(&value.to_le_bytes());
}

fn get_i32(data: &[u8], off: usize) -> i32 {
    i32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

fn put_i32(data: &mut [u8], off: usize, value: i32) {
    data[off..off + 4].copy_from_slice(&value.to_le_bytes());
}

/// Loads a child page and repoints its `parent_page_id`.
///
/// Used by internal node moves: every child handed to a new parent must be
/// adopted through the buffer pool so the change is persisted.
fn reparent_child(
    bpm: &BufferPoolManager,
    child_id: PageId,
    new_parent: PageId,
) -> Result<()> {
    let mut child = bpm.fetch_page_pinned(child_id)?;
    {
        let mut data = child.frame().write_data();
        NodeView::new(&mut data[..]).set_parent_page_id(new_parent);
    }
    child.mark_dirty();
    Ok(())
}

/// Header-only view over any tree page.
pub struct NodeView<B> {
    data: B,
}

impl<B: AsRef<[u8]>> NodeView<B> {
    /// Wraps a tree page buffer.
    pub fn new(data: B) -> Self {
        Self { data }
    }

    /// Returns the node kind.
    pub fn page_type(&self) -> NodeType {
        NodeType::from_u32(get_u32(self.data.as_ref(), OFF_PAGE_TYPE))
    }

    /// Returns the log sequence number.
    pub fn lsn(&self) -> u32 {
        get_u32(self.data.as_ref(), OFF_LSN)
    }

    /// Returns the number of entries.
    pub fn size(&self) -> i32 {
        get_i32(self.data.as_ref(), OFF_SIZE)
    }

    /// Returns the declared entry capacity.
    pub fn max_size(&self) -> i32 {
        get_i32(self.data.as_ref(), OFF_MAX_SIZE)
    }

    /// Returns the minimum entry count for a non-root node of this kind.
    pub fn min_size(&self) -> i32 {
        let max = self.max_size();
        if self.is_leaf() {
            (max + 1) / 2
        } else {
            (max + 2) / 2
        }
    }

    /// Returns the parent page id, INVALID for the root.
    pub fn parent_page_id(&self) -> PageId {
        PageId(get_i32(self.data.as_ref(), OFF_PARENT))
    }

    /// Returns this page's own id.
    pub fn page_id(&self) -> PageId {
        PageId(get_i32(self.data.as_ref(), OFF_SELF))
    }

    /// Returns true for leaf pages.
    pub fn is_leaf(&self) -> bool {
        self.page_type() == NodeType::Leaf
    }

    /// Returns true iff this node has no parent.
    pub fn is_root(&self) -> bool {
        !self.parent_page_id().is_valid()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> NodeView<B> {
    /// Sets the parent page id.
    pub fn set_parent_page_id(&mut self, parent: PageId) {
        put_i32(self.data.as_mut(), OFF_PARENT, parent.0);
    }

    /// Sets the entry count.
    pub fn set_size(&mut self, size: i32) {
        put_i32(self.data.as_mut(), OFF_SIZE, size);
    }

    fn init_header(&mut self, node_type: NodeType, page_id: PageId, parent: PageId, max_size: i32) {
        let data = self.data.as_mut();
        put_u32(data, OFF_PAGE_TYPE, node_type as u32);
        put_u32(data, OFF_LSN, 0);
        put_i32(data, OFF_SIZE, 0);
        put_i32(data, OFF_MAX_SIZE, max_size);
        put_i32(data, OFF_PARENT, parent.0);
        put_i32(data, OFF_SELF, page_id.0);
    }
}

/// Typed view over a leaf page.
pub struct LeafNodeView<B, K> {
    data: B,
    _key: PhantomData<K>,
}

impl<B: AsRef<[u8]>, K: IndexKey> LeafNodeView<B, K> {
    /// Wraps a leaf page buffer.
    pub fn new(data: B) -> Self {
        Self {
            data,
            _key: PhantomData,
        }
    }

    fn entry_len() -> usize {
        K::ENCODED_LEN + Rid::ENCODED_LEN
    }

    fn entry_offset(index: usize) -> usize {
        LEAF_HEADER_LEN + index * Self::entry_len()
    }

    /// Returns the number of entries.
    pub fn size(&self) -> i32 {
        get_i32(self.data.as_ref(), OFF_SIZE)
    }

    /// Returns the declared entry capacity.
    pub fn max_size(&self) -> i32 {
        get_i32(self.data.as_ref(), OFF_MAX_SIZE)
    }

    /// Returns the minimum entry count for a non-root leaf.
    pub fn min_size(&self) -> i32 {
        (self.max_size() + 1) / 2
    }

    /// Returns the parent page id.
    pub fn parent_page_id(&self) -> PageId {
        PageId(get_i32(self.data.as_ref(), OFF_PARENT))
    }

    /// Returns this page's own id.
    pub fn page_id(&self) -> PageId {
        PageId(get_i32(self.data.as_ref(), OFF_SELF))
    }

    /// Returns the next leaf in key order, INVALID at the chain end.
    pub fn next_page_id(&self) -> PageId {
        PageId(get_i32(self.data.as_ref(), OFF_NEXT))
    }

    /// Returns the key at `index`.
    pub fn key_at(&self, index: usize) -> K {
        K::decode(&self.data.as_ref()[Self::entry_offset(index)..])
    }

    /// Returns the rid at `index`.
    pub fn rid_at(&self, index: usize) -> Rid {
        Rid::decode(&self.data.as_ref()[Self::entry_offset(index) + K::ENCODED_LEN..])
    }

    /// Returns the `(key, rid)` pair at `index`.
    pub fn item(&self, index: usize) -> (K, Rid) {
        (self.key_at(index), self.rid_at(index))
    }

    /// Binary search for `key`. Returns `Ok(index)` if present,
    /// `Err(index)` with the insertion point otherwise.
    pub fn search<C: KeyComparator<K>>(&self, key: &K, cmp: &C) -> std::result::Result<usize, usize> {
        let mut low = 0usize;
        let mut high = self.size() as usize;

        while low < high {
            let mid = low + (high - low) / 2;
            match cmp.compare(key, &self.key_at(mid)) {
                std::cmp::Ordering::Equal => return Ok(mid),
                std::cmp::Ordering::Less => high = mid,
                std::cmp::Ordering::Greater => low = mid + 1,
            }
        }
        Err(low)
    }

    /// Returns the first index whose key is `>= key` (range-start
    /// positioning).
    pub fn key_index<C: KeyComparator<K>>(&self, key: &K, cmp: &C) -> usize {
        match self.search(key, cmp) {
            Ok(index) | Err(index) => index,
        }
    }

    /// Point lookup.
    pub fn lookup<C: KeyComparator<K>>(&self, key: &K, cmp: &C) -> Option<Rid> {
        self.search(key, cmp).ok().map(|index| self.rid_at(index))
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>, K: IndexKey> LeafNodeView<B, K> {
    /// Initializes a freshly allocated page as an empty leaf.
    pub fn init(&mut self, page_id: PageId, parent: PageId, max_size: i32) {
        debug_assert!(max_size >= 2);
        // One slack entry beyond max_size for the pre-split overflow
        debug_assert!(max_size as usize + 1 <= leaf_capacity::<K>());
        NodeView::new(self.data.as_mut()).init_header(NodeType::Leaf, page_id, parent, max_size);
        put_i32(self.data.as_mut(), OFF_NEXT, PageId::INVALID.0);
    }

    /// Sets the next-leaf pointer.
    pub fn set_next_page_id(&mut self, next: PageId) {
        put_i32(self.data.as_mut(), OFF_NEXT, next.0);
    }

    fn write_entry(&mut self, index: usize, key: &K, rid: &Rid) {
        let off = Self::entry_offset(index);
        let data = self.data.as_mut();
        key.encode(&mut data[off..]);
        rid.encode(&mut data[off + K::ENCODED_LEN..]);
    }

    fn set_size(&mut self, size: i32) {
        put_i32(self.data.as_mut(), OFF_SIZE, size);
    }

    /// Inserts `(key, rid)` in key order. Returns the resulting size;
    /// unchanged when the key already exists.
    pub fn insert<C: KeyComparator<K>>(&mut self, key: &K, rid: &Rid, cmp: &C) -> i32 {
        let size = self.size();
        match self.search(key, cmp) {
            Ok(_) => size,
            Err(index) => {
                let entry_len = Self::entry_len();
                let start = Self::entry_offset(index);
                let end = Self::entry_offset(size as usize);
                if index < size as usize {
                    self.data.as_mut().copy_within(start..end, start + entry_len);
                }
                self.write_entry(index, key, rid);
                self.set_size(size + 1);
                size + 1
            }
        }
    }

    /// Removes `key`. Returns the resulting size, or `None` if absent.
    pub fn remove<C: KeyComparator<K>>(&mut self, key: &K, cmp: &C) -> Option<i32> {
        let index = self.search(key, cmp).ok()?;
        let size = self.size() as usize;

        let start = Self::entry_offset(index + 1);
        let end = Self::entry_offset(size);
        if start < end {
            self.data
                .as_mut()
                .copy_within(start..end, Self::entry_offset(index));
        }
        self.set_size(size as i32 - 1);
        Some(size as i32 - 1)
    }

    fn copy_entries_to<B2>(
        &self,
        from: usize,
        count: usize,
        recipient: &mut LeafNodeView<B2, K>,
        to: usize,
    ) where
        B2: AsRef<[u8]> + AsMut<[u8]>,
    {
        let len = count * Self::entry_len();
        let src = Self::entry_offset(from);
        let dst = Self::entry_offset(to);
        recipient.data.as_mut()[dst..dst + len]
            .copy_from_slice(&self.data.as_ref()[src..src + len]);
    }

    /// Moves the upper half `[size/2, size)` into an empty `recipient`.
    pub fn move_half_to<B2>(&mut self, recipient: &mut LeafNodeView<B2, K>)
    where
        B2: AsRef<[u8]> + AsMut<[u8]>,
    {
        debug_assert_eq!(recipient.size(), 0);
        let size = self.size() as usize;
        let half = size / 2;
        let count = size - half;

        self.copy_entries_to(half, count, recipient, 0);
        recipient.set_size(count as i32);
        self.set_size(half as i32);
    }

    /// Appends all entries to `recipient`, emptying this leaf. The caller
    /// splices the leaf chain: the recipient inherits this leaf's former
    /// next pointer.
    pub fn move_all_to<B2>(&mut self, recipient: &mut LeafNodeView<B2, K>)
    where
        B2: AsRef<[u8]> + AsMut<[u8]>,
    {
        let size = self.size() as usize;
        let recipient_size = recipient.size() as usize;

        self.copy_entries_to(0, size, recipient, recipient_size);
        recipient.set_size((recipient_size + size) as i32);
        self.set_size(0);
    }

    /// Moves this leaf's first entry to the end of `recipient`.
    pub fn move_first_to_end_of<B2>(&mut self, recipient: &mut LeafNodeView<B2, K>)
    where
        B2: AsRef<[u8]> + AsMut<[u8]>,
    {
        let size = self.size() as usize;
        debug_assert!(size > 0);

        self.copy_entries_to(0, 1, recipient, recipient.size() as usize);
        recipient.set_size(recipient.size() + 1);

        let start = Self::entry_offset(1);
        let end = Self::entry_offset(size);
        self.data.as_mut().copy_within(start..end, Self::entry_offset(0));
        self.set_size(size as i32 - 1);
    }

    /// Moves this leaf's last entry to the front of `recipient`.
    pub fn move_last_to_front_of<B2>(&mut self, recipient: &mut LeafNodeView<B2, K>)
    where
        B2: AsRef<[u8]> + AsMut<[u8]>,
    {
        let size = self.size() as usize;
        debug_assert!(size > 0);
        let recipient_size = recipient.size() as usize;

        let start = Self::entry_offset(0);
        let end = Self::entry_offset(recipient_size);
        recipient
            .data
            .as_mut()
            .copy_within(start..end, Self::entry_offset(1));

        self.copy_entries_to(size - 1, 1, recipient, 0);
        recipient.set_size(recipient_size as i32 + 1);
        self.set_size(size as i32 - 1);
    }
}

/// Typed view over an internal page.
pub struct InternalNodeView<B, K> {
    data: B,
    _key: PhantomData<K>,
}

impl<B: AsRef<[u8]>, K: IndexKey> InternalNodeView<B, K> {
    /// Wraps an internal page buffer.
    pub fn new(data: B) -> Self {
        Self {
            data,
            _key: PhantomData,
        }
    }

    fn entry_len() -> usize {
        K::ENCODED_LEN + CHILD_ID_LEN
    }

    fn entry_offset(index: usize) -> usize {
        NODE_HEADER_LEN + index * Self::entry_len()
    }

    /// Returns the number of entries (child pointers).
    pub fn size(&self) -> i32 {
        get_i32(self.data.as_ref(), OFF_SIZE)
    }

    /// Returns the declared entry capacity.
    pub fn max_size(&self) -> i32 {
        get_i32(self.data.as_ref(), OFF_MAX_SIZE)
    }

    /// Returns the minimum entry count for a non-root internal node.
    pub fn min_size(&self) -> i32 {
        (self.max_size() + 2) / 2
    }

    /// Returns the parent page id.
    pub fn parent_page_id(&self) -> PageId {
        PageId(get_i32(self.data.as_ref(), OFF_PARENT))
    }

    /// Returns this page's own id.
    pub fn page_id(&self) -> PageId {
        PageId(get_i32(self.data.as_ref(), OFF_SELF))
    }

    /// Returns the separator key at `index`. Index 0 is an unused sentinel.
    pub fn key_at(&self, index: usize) -> K {
        K::decode(&self.data.as_ref()[Self::entry_offset(index)..])
    }

    /// Returns the child page id at `index`.
    pub fn value_at(&self, index: usize) -> PageId {
        PageId(get_i32(
            self.data.as_ref(),
            Self::entry_offset(index) + K::ENCODED_LEN,
        ))
    }

    /// Linear search for a child pointer. Returns its index, or `None`.
    pub fn value_index(&self, value: PageId) -> Option<usize> {
        (0..self.size() as usize).find(|&i| self.value_at(i) == value)
    }

    /// Returns the child that covers `key`: the child left of the first
    /// separator greater than `key`, or the last child if none is.
    pub fn lookup<C: KeyComparator<K>>(&self, key: &K, cmp: &C) -> PageId {
        let mut low = 1usize;
        let mut high = self.size() as usize;

        while low < high {
            let mid = low + (high - low) / 2;
            if cmp.compare(key, &self.key_at(mid)) == std::cmp::Ordering::Less {
                high = mid;
            } else {
                low = mid + 1;
            }
        }
        self.value_at(low - 1)
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>, K: IndexKey> InternalNodeView<B, K> {
    /// Initializes a freshly allocated page as an empty internal node.
    pub fn init(&mut self, page_id: PageId, parent: PageId, max_size: i32) {
        debug_assert!(max_size >= 2);
        // Two slack entries beyond max_size: a coalesced node can sit at
        // max_size + 1 and still absorb one insert before splitting
        debug_assert!(max_size as usize + 2 <= internal_capacity::<K>());
        NodeView::new(self.data.as_mut()).init_header(
            NodeType::Internal,
            page_id,
            parent,
            max_size,
        );
    }

    /// Sets the separator key at `index`.
    pub fn set_key_at(&mut self, index: usize, key: &K) {
        key.encode(&mut self.data.as_mut()[Self::entry_offset(index)..]);
    }

    fn set_size(&mut self, size: i32) {
        put_i32(self.data.as_mut(), OFF_SIZE, size);
    }

    fn write_entry(&mut self, index: usize, key: &K, value: PageId) {
        let off = Self::entry_offset(index);
        key.encode(&mut self.data.as_mut()[off..]);
        put_i32(self.data.as_mut(), off + K::ENCODED_LEN, value.0);
    }

    /// Makes this node the root above a freshly split pair:
    /// `[(⊥, old_child), (key, new_child)]`.
    pub fn populate_new_root(&mut self, old_child: PageId, key: &K, new_child: PageId) {
        self.write_entry(0, &K::default(), old_child);
        self.write_entry(1, key, new_child);
        self.set_size(2);
    }

    /// Inserts `(key, new_value)` immediately after the entry holding
    /// `old_value`. Returns the resulting size; unchanged if `old_value`
    /// is not present.
    pub fn insert_node_after(&mut self, old_value: PageId, key: &K, new_value: PageId) -> i32 {
        let size = self.size();
        let Some(index) = self.value_index(old_value) else {
            return size;
        };

        let entry_len = Self::entry_len();
        let start = Self::entry_offset(index + 1);
        let end = Self::entry_offset(size as usize);
        if start < end {
            self.data.as_mut().copy_within(start..end, start + entry_len);
        }
        self.write_entry(index + 1, key, new_value);
        self.set_size(size + 1);
        size + 1
    }

    /// Removes the entry at `index`.
    pub fn remove(&mut self, index: usize) {
        let size = self.size() as usize;
        let start = Self::entry_offset(index + 1);
        let end = Self::entry_offset(size);
        if start < end {
            self.data
                .as_mut()
                .copy_within(start..end, Self::entry_offset(index));
        }
        self.set_size(size as i32 - 1);
    }

    /// Removes and returns the only remaining child. Root collapse only.
    pub fn remove_and_return_only_child(&mut self) -> PageId {
        debug_assert_eq!(self.size(), 1);
        let child = self.value_at(0);
        self.set_size(0);
        child
    }

    fn copy_entries_to<B2>(
        &self,
        from: usize,
        count: usize,
        recipient: &mut InternalNodeView<B2, K>,
        to: usize,
    ) where
        B2: AsRef<[u8]> + AsMut<[u8]>,
    {
        let len = count * Self::entry_len();
        let src = Self::entry_offset(from);
        let dst = Self::entry_offset(to);
        recipient.data.as_mut()[dst..dst + len]
            .copy_from_slice(&self.data.as_ref()[src..src + len]);
    }

    /// Moves the upper half `[size/2, size)` into an empty `recipient`,
    /// adopting each moved child through the buffer pool.
    ///
    /// `skip_child` names a moved child the caller already holds
    /// write-latched (the descent path runs through it); the caller
    /// repoints that one through its own guard, since re-latching it here
    /// would self-deadlock.
    pub fn move_half_to<B2>(
        &mut self,
        recipient: &mut InternalNodeView<B2, K>,
        bpm: &BufferPoolManager,
        skip_child: Option<PageId>,
    ) -> Result<()>
    where
        B2: AsRef<[u8]> + AsMut<[u8]>,
    {
        debug_assert_eq!(recipient.size(), 0);
        let size = self.size() as usize;
        let half = size / 2;
        let count = size - half;

        self.copy_entries_to(half, count, recipient, 0);
        recipient.set_size(count as i32);
        self.set_size(half as i32);

        let new_parent = recipient.page_id();
        for i in 0..count {
            let child = recipient.value_at(i);
            if Some(child) == skip_child {
                continue;
            }
            reparent_child(bpm, child, new_parent)?;
        }
        Ok(())
    }

    /// Appends all entries to `recipient`, pulling `middle_key` down from
    /// the parent as the separator over the first moved child, and adopting
    /// every moved child through the buffer pool.
    ///
    /// `skip_child` as in [`Self::move_half_to`].
    pub fn move_all_to<B2>(
        &mut self,
        recipient: &mut InternalNodeView<B2, K>,
        middle_key: &K,
        bpm: &BufferPoolManager,
        skip_child: Option<PageId>,
    ) -> Result<()>
    where
        B2: AsRef<[u8]> + AsMut<[u8]>,
    {
        self.set_key_at(0, middle_key);

        let size = self.size() as usize;
        let recipient_size = recipient.size() as usize;
        self.copy_entries_to(0, size, recipient, recipient_size);
        recipient.set_size((recipient_size + size) as i32);
        self.set_size(0);

        let new_parent = recipient.page_id();
        for i in recipient_size..recipient_size + size {
            let child = recipient.value_at(i);
            if Some(child) == skip_child {
                continue;
            }
            reparent_child(bpm, child, new_parent)?;
        }
        Ok(())
    }

    /// Moves this node's first entry to the end of `recipient`, carrying
    /// `middle_key` down as the moved entry's separator.
    pub fn move_first_to_end_of<B2>(
        &mut self,
        recipient: &mut InternalNodeView<B2, K>,
        middle_key: &K,
        bpm: &BufferPoolManager,
    ) -> Result<()>
    where
        B2: AsRef<[u8]> + AsMut<[u8]>,
    {
        let size = self.size() as usize;
        debug_assert!(size > 1);

        self.set_key_at(0, middle_key);
        let moved_child = self.value_at(0);
        self.copy_entries_to(0, 1, recipient, recipient.size() as usize);
        recipient.set_size(recipient.size() + 1);

        let start = Self::entry_offset(1);
        let end = Self::entry_offset(size);
        self.data.as_mut().copy_within(start..end, Self::entry_offset(0));
        self.set_key_at(0, &K::default());
        self.set_size(size as i32 - 1);

        reparent_child(bpm, moved_child, recipient.page_id())
    }

    /// Moves this node's last entry to the front of `recipient`; the
    /// displaced sentinel slot takes `middle_key` as it shifts to index 1.
    pub fn move_last_to_front_of<B2>(
        &mut self,
        recipient: &mut InternalNodeView<B2, K>,
        middle_key: &K,
        bpm: &BufferPoolManager,
    ) -> Result<()>
    where
        B2: AsRef<[u8]> + AsMut<[u8]>,
    {
        let size = self.size() as usize;
        debug_assert!(size > 1);

        recipient.set_key_at(0, middle_key);
        let moved_child = self.value_at(size - 1);

        // Shift the recipient right by one entry before writing index 0
        let recipient_size = recipient.size() as usize;
        let start = Self::entry_offset(0);
        let end = Self::entry_offset(recipient_size);
        recipient
            .data
            .as_mut()
            .copy_within(start..end, Self::entry_offset(1));
        recipient.write_entry(0, &K::default(), moved_child);
        recipient.set_size(recipient_size as i32 + 1);

        self.set_size(size as i32 - 1);

        reparent_child(bpm, moved_child, recipient.page_id())
    }
}
