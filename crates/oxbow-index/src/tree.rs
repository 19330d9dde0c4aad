//! Latch-crabbing B+ tree index over the buffer pool.
//!
//! Tree nodes are pages fetched through the buffer pool and interpreted
//! via the views in [`crate::node`]. Concurrency control is latch
//! crabbing: descents latch a child before releasing its parent, writers
//! drop the whole ancestor chain as soon as a node is safe, and a
//! dedicated root-id latch (the lock around `root_page_id` itself) is
//! always taken outermost.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt::Write as _;
use std::sync::Arc;

use crate::iterator::TreeIterator;
use crate::key::{IndexKey, KeyComparator};
use crate::node::{
    internal_capacity, leaf_capacity, InternalNodeView, LeafNodeView, NodeView,
};
use crate::transaction::{LatchedPage, Transaction};
use oxbow_buffer::{BufferPoolManager, PageBuf, PinnedPage};
use oxbow_common::page::{PageId, HEADER_PAGE_ID};
use oxbow_common::{OxbowError, Result, Rid};
use oxbow_storage::HeaderPageView;

/// Write descent modes. Read descents take the shared-latch path in
/// `find_leaf_read` and need no mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Insert,
    Delete,
}

fn corrupted(msg: &str) -> OxbowError {
    OxbowError::TreeCorrupted(msg.to_string())
}

/// A clustered B+ tree mapping fixed-width keys to record ids.
///
/// Keys are unique; duplicates are rejected. The current root page id is
/// persisted in the header page under `index_name` whenever it changes.
pub struct BPlusTree<K: IndexKey, C: KeyComparator<K>> {
    index_name: String,
    /// Root page id behind the root-id latch.
    root: RwLock<PageId>,
    bpm: Arc<BufferPoolManager>,
    comparator: C,
    leaf_max_size: i32,
    internal_max_size: i32,
    _marker: std::marker::PhantomData<K>,
}

impl<K: IndexKey, C: KeyComparator<K>> BPlusTree<K, C> {
    /// Opens (or creates) the index named `index_name`.
    ///
    /// An existing root recorded in the header page is picked up;
    /// otherwise the tree starts empty and records its root on first
    /// insert.
    pub fn new(
        index_name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: i32,
        internal_max_size: i32,
    ) -> Result<Self> {
        let index_name = index_name.into();
        if index_name.is_empty() || index_name.len() >= oxbow_storage::MAX_INDEX_NAME_LEN {
            return Err(OxbowError::ConfigError(format!(
                "invalid index name: {:?}",
                index_name
            )));
        }
        // Leaves overflow to max_size + 1 entries before splitting (a
        // coalesced leaf can sit exactly at max_size); internal nodes
        // overflow to max_size + 2 before splitting
        if leaf_max_size < 2 || leaf_max_size as usize + 1 > leaf_capacity::<K>() {
            return Err(OxbowError::ConfigError(format!(
                "leaf_max_size {} out of range [2, {}]",
                leaf_max_size,
                leaf_capacity::<K>() - 1
            )));
        }
        if internal_max_size < 2 || internal_max_size as usize + 2 > internal_capacity::<K>() {
            return Err(OxbowError::ConfigError(format!(
                "internal_max_size {} out of range [2, {}]",
                internal_max_size,
                internal_capacity::<K>() - 2
            )));
        }

        let root_id = {
            let header = bpm.fetch_page_pinned(HEADER_PAGE_ID)?;
            let data = header.frame().read_data();
            HeaderPageView::new(&data[..])
                .get_record(&index_name)
                .unwrap_or(PageId::INVALID)
        };

        Ok(Self {
            index_name,
            root: RwLock::new(root_id),
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
            _marker: std::marker::PhantomData,
        })
    }

    /// Opens the index with the largest node sizes the page layout allows.
    pub fn with_default_sizes(
        index_name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
    ) -> Result<Self> {
        let leaf_max = leaf_capacity::<K>() as i32 - 1;
        let internal_max = internal_capacity::<K>() as i32 - 2;
        Self::new(index_name, bpm, comparator, leaf_max, internal_max)
    }

    /// Returns the index name.
    pub fn name(&self) -> &str {
        &self.index_name
    }

    /// Returns true if the tree holds no keys.
    pub fn is_empty(&self) -> bool {
        !self.root.read().is_valid()
    }

    /// Returns the tree height: the number of edges from the root down to
    /// a leaf. Both an empty tree and a lone root leaf report 0.
    pub fn height(&self) -> Result<u32> {
        let root_guard = self.root.read();
        let mut page_id = *root_guard;
        if !page_id.is_valid() {
            return Ok(0);
        }

        let mut height = 0;
        loop {
            let page = self.bpm.fetch_page_pinned(page_id)?;
            let data = page.frame().read_data();
            if NodeView::new(&data[..]).is_leaf() {
                return Ok(height);
            }
            page_id = InternalNodeView::<_, K>::new(&data[..]).value_at(0);
            height += 1;
        }
    }

    // =========================================================================
    // Search
    // =========================================================================

    /// Point lookup.
    pub fn get_value(&self, key: &K) -> Result<Option<Rid>> {
        let Some((guard, _pin)) = self.find_leaf_read(Some(key))? else {
            return Ok(None);
        };
        let leaf = LeafNodeView::<_, K>::new(&guard[..]);
        Ok(leaf.lookup(key, &self.comparator))
    }

    /// Read-mode descent: at most two read latches are held at a time,
    /// the parent being released as soon as the child is latched. The
    /// root-id latch is dropped once the root page itself is latched.
    ///
    /// `key = None` descends to the leftmost leaf. Returns `None` for an
    /// empty tree.
    fn find_leaf_read(
        &self,
        key: Option<&K>,
    ) -> Result<Option<(RwLockReadGuard<'_, PageBuf>, PinnedPage<'_>)>> {
        let root_guard = self.root.read();
        let root_id = *root_guard;
        if !root_id.is_valid() {
            return Ok(None);
        }

        let mut cur_pin = self.bpm.fetch_page_pinned(root_id)?;
        let mut cur_guard = cur_pin.frame().read_data();
        // Root page latched: holding its latch pins the root id in place,
        // so the root-id latch can go.
        drop(root_guard);

        loop {
            if NodeView::new(&cur_guard[..]).is_leaf() {
                return Ok(Some((cur_guard, cur_pin)));
            }

            let child_id = {
                let internal = InternalNodeView::<_, K>::new(&cur_guard[..]);
                match key {
                    Some(key) => internal.lookup(key, &self.comparator),
                    None => internal.value_at(0),
                }
            };

            let next_pin = self.bpm.fetch_page_pinned(child_id)?;
            let next_guard = next_pin.frame().read_data();
            // Child latched; release the parent.
            drop(cur_guard);
            drop(cur_pin);
            cur_pin = next_pin;
            cur_guard = next_guard;
        }
    }

    // =========================================================================
    // Insertion
    // =========================================================================

    /// Inserts `key -> rid`. Returns false (and changes nothing) if the
    /// key is already present.
    pub fn insert<'a>(&'a self, key: K, rid: Rid, txn: &mut Transaction<'a>) -> Result<bool> {
        let root_guard = self.root.write();
        if !root_guard.is_valid() {
            return self.start_new_tree(key, rid, root_guard);
        }

        txn.root_guard = Some(root_guard);
        let result = self.insert_into_leaf(key, rid, txn);
        // The root latch never outlives the operation
        txn.root_guard.take();
        result
    }

    fn start_new_tree(
        &self,
        key: K,
        rid: Rid,
        mut root_guard: RwLockWriteGuard<'_, PageId>,
    ) -> Result<bool> {
        let mut page = self.bpm.new_page_pinned()?;
        let page_id = page.page_id();
        {
            let mut data = page.frame().write_data();
            let mut leaf = LeafNodeView::<_, K>::new(&mut data[..]);
            leaf.init(page_id, PageId::INVALID, self.leaf_max_size);
            leaf.insert(&key, &rid, &self.comparator);
        }
        page.mark_dirty();
        drop(page);

        *root_guard = page_id;
        self.persist_root_id(page_id)?;
        log::debug!("started new tree with root {}", page_id);
        Ok(true)
    }

    fn insert_into_leaf<'a>(
        &'a self,
        key: K,
        rid: Rid,
        txn: &mut Transaction<'a>,
    ) -> Result<bool> {
        let mut leaf = self.find_leaf_write(&key, Operation::Insert, txn)?;

        let (old_size, new_size) = {
            let mut view = LeafNodeView::<_, K>::new(&mut leaf.guard[..]);
            let old_size = view.size();
            let new_size = view.insert(&key, &rid, &self.comparator);
            (old_size, new_size)
        };
        let duplicated = new_size == old_size;

        if !duplicated && new_size >= self.leaf_max_size {
            if let Err(e) = self.split_leaf(&mut leaf, txn) {
                self.release_ancestors(txn);
                leaf.page.mark_dirty();
                drop(leaf);
                return Err(e);
            }
        }

        // A split drains the whole unsafe chain through
        // insert_into_parent, marking each consumed ancestor dirty there;
        // leftovers were never written
        self.release_ancestors(txn);

        let leaf_is_root = NodeView::new(&leaf.guard[..]).is_root();
        if !duplicated {
            leaf.page.mark_dirty();
        }
        drop(leaf);
        if leaf_is_root {
            txn.root_guard.take();
        }

        Ok(!duplicated)
    }

    /// Splits a full leaf: the upper half moves to a fresh sibling which
    /// is spliced into the leaf chain, and the sibling's first key rises
    /// into the parent.
    fn split_leaf<'a>(&'a self, leaf: &mut LatchedPage<'a>, txn: &mut Transaction<'a>) -> Result<()> {
        let mut new_page = self.bpm.new_page_pinned()?;
        let new_id = new_page.page_id();

        let sep_key = {
            let mut new_data = new_page.frame().write_data();
            let mut new_leaf = LeafNodeView::<_, K>::new(&mut new_data[..]);
            let mut old_leaf = LeafNodeView::<_, K>::new(&mut leaf.guard[..]);

            new_leaf.init(new_id, old_leaf.parent_page_id(), self.leaf_max_size);
            old_leaf.move_half_to(&mut new_leaf);
            new_leaf.set_next_page_id(old_leaf.next_page_id());
            old_leaf.set_next_page_id(new_id);
            new_leaf.key_at(0)
        };
        new_page.mark_dirty();
        log::debug!("split leaf {} -> {}", leaf.page_id(), new_id);

        self.insert_into_parent(leaf, sep_key, new_page, txn)
    }

    /// Links a freshly split-off sibling into `old`'s parent, splitting
    /// upward as needed. Consumes the nearest latched ancestor from the
    /// transaction at each level; if `old` is the root, a new root is
    /// created instead and the root-id latch is released.
    fn insert_into_parent<'a>(
        &'a self,
        old: &mut LatchedPage<'a>,
        sep_key: K,
        mut new_page: PinnedPage<'a>,
        txn: &mut Transaction<'a>,
    ) -> Result<()> {
        let old_id = old.page_id();
        let new_id = new_page.page_id();

        if NodeView::new(&old.guard[..]).is_root() {
            let mut root_page = self.bpm.new_page_pinned()?;
            let root_id = root_page.page_id();
            {
                let mut data = root_page.frame().write_data();
                let mut root_view = InternalNodeView::<_, K>::new(&mut data[..]);
                root_view.init(root_id, PageId::INVALID, self.internal_max_size);
                root_view.populate_new_root(old_id, &sep_key, new_id);
            }
            root_page.mark_dirty();

            NodeView::new(&mut old.guard[..]).set_parent_page_id(root_id);
            {
                let mut data = new_page.frame().write_data();
                NodeView::new(&mut data[..]).set_parent_page_id(root_id);
            }
            new_page.mark_dirty();
            drop(new_page);
            drop(root_page);

            // Publish and persist the new root, then release the root latch
            let mut root_guard = txn
                .root_guard
                .take()
                .ok_or_else(|| corrupted("root latch not held while growing the tree"))?;
            *root_guard = root_id;
            self.persist_root_id(root_id)?;
            drop(root_guard);

            log::debug!("tree grew a new root {}", root_id);
            return Ok(());
        }

        let mut parent = txn
            .ancestors
            .pop()
            .ok_or_else(|| corrupted("split node has no latched parent"))?;

        let parent_size = InternalNodeView::<_, K>::new(&mut parent.guard[..])
            .insert_node_after(old_id, &sep_key, new_id);
        parent.page.mark_dirty();
        new_page.mark_dirty();
        drop(new_page);

        if parent_size > self.internal_max_size {
            let mut sibling_page = self.bpm.new_page_pinned()?;
            let sibling_id = sibling_page.page_id();
            sibling_page.mark_dirty();

            let (lifted_key, old_moved) = {
                let mut sibling_data = sibling_page.frame().write_data();
                let mut sibling = InternalNodeView::<_, K>::new(&mut sibling_data[..]);
                let mut parent_view = InternalNodeView::<_, K>::new(&mut parent.guard[..]);

                sibling.init(
                    sibling_id,
                    parent_view.parent_page_id(),
                    self.internal_max_size,
                );
                // `old` is still write-latched by this thread; its parent
                // pointer is fixed up below through the held guard
                parent_view.move_half_to(&mut sibling, self.bpm.as_ref(), Some(old_id))?;

                // The first moved key rises as the separator; its slot
                // becomes the sentinel
                let lifted = sibling.key_at(0);
                sibling.set_key_at(0, &K::default());
                (lifted, sibling.value_index(old_id).is_some())
            };
            if old_moved {
                NodeView::new(&mut old.guard[..]).set_parent_page_id(sibling_id);
            }
            log::debug!("split internal {} -> {}", parent.page_id(), sibling_id);

            self.insert_into_parent(&mut parent, lifted_key, sibling_page, txn)?;
        }

        drop(parent);
        Ok(())
    }

    // =========================================================================
    // Removal
    // =========================================================================

    /// Removes `key` if present. Absent keys are a no-op.
    pub fn remove<'a>(&'a self, key: &K, txn: &mut Transaction<'a>) -> Result<()> {
        let root_guard = self.root.write();
        if !root_guard.is_valid() {
            return Ok(());
        }

        txn.root_guard = Some(root_guard);
        let result = self.remove_from_leaf(key, txn);
        txn.root_guard.take();

        // Dispose of pages emptied by coalescing, now that every latch
        // and pin is gone
        let mut drain_failed = false;
        for page_id in std::mem::take(&mut txn.deleted_pages) {
            if !self.bpm.delete_page(page_id) {
                log::error!("deleted tree page {} still pinned", page_id);
                drain_failed = true;
            }
        }
        if drain_failed && result.is_ok() {
            return Err(corrupted("deleted page still pinned after unwind"));
        }
        result
    }

    fn remove_from_leaf<'a>(&'a self, key: &K, txn: &mut Transaction<'a>) -> Result<()> {
        let mut leaf = self.find_leaf_write(key, Operation::Delete, txn)?;

        let removed = {
            let mut view = LeafNodeView::<_, K>::new(&mut leaf.guard[..]);
            view.remove(key, &self.comparator)
        };
        let Some(new_size) = removed else {
            self.release_ancestors(txn);
            drop(leaf);
            return Ok(());
        };

        let min_size = LeafNodeView::<_, K>::new(&leaf.guard[..]).min_size();
        if new_size < min_size {
            if let Err(e) = self.coalesce_or_redistribute(&mut leaf, None, txn) {
                self.release_ancestors(txn);
                leaf.page.mark_dirty();
                drop(leaf);
                return Err(e);
            }
        }

        // The rebalance stops popping ancestors as soon as a parent stays
        // at or above min_size, marking dirty exactly the ones it wrote;
        // anything still on the stack goes back clean
        self.release_ancestors(txn);
        leaf.page.mark_dirty();
        drop(leaf);
        Ok(())
    }

    /// Rebalances an underflowing node against a sibling: redistribute
    /// one entry when the pair can afford it, coalesce otherwise. Emptied
    /// pages are queued on the transaction for disposal.
    ///
    /// `held_child` is the one child of `node` whose write latch this
    /// thread already holds (the descent path runs through it); moves that
    /// would reparent it must write through that guard instead of
    /// re-latching.
    fn coalesce_or_redistribute<'a>(
        &'a self,
        node: &mut LatchedPage<'a>,
        held_child: Option<&mut LatchedPage<'a>>,
        txn: &mut Transaction<'a>,
    ) -> Result<()> {
        let node_id = node.page_id();

        if NodeView::new(&node.guard[..]).is_root() {
            if self.adjust_root(node, txn)? {
                txn.deleted_pages.insert(node_id);
            }
            return Ok(());
        }

        let mut parent = txn
            .ancestors
            .pop()
            .ok_or_else(|| corrupted("underflowed node has no latched parent"))?;

        let (node_index, parent_size) = {
            let parent_view = InternalNodeView::<_, K>::new(&parent.guard[..]);
            let index = parent_view
                .value_index(node_id)
                .ok_or_else(|| corrupted("node not referenced by its parent"))?;
            (index, parent_view.size() as usize)
        };

        let (node_is_leaf, node_size, node_max) = {
            let view = NodeView::new(&node.guard[..]);
            (view.is_leaf(), view.size(), view.max_size())
        };
        let can_redistribute = |sibling_size: i32| {
            if node_is_leaf {
                node_size + sibling_size > node_max
            } else {
                node_size + sibling_size > node_max + 1
            }
        };

        // Pick a sibling: edge children have one choice; in the middle,
        // try the right sibling first, then the left, preferring one that
        // permits redistribution; coalesce with the right otherwise.
        let (mut sibling, from_left) = if node_index == 0 {
            (self.latch_child(&parent, 1)?, false)
        } else if node_index == parent_size - 1 {
            (self.latch_child(&parent, node_index - 1)?, true)
        } else {
            let right = self.latch_child(&parent, node_index + 1)?;
            if can_redistribute(NodeView::new(&right.guard[..]).size()) {
                (right, false)
            } else {
                let left = self.latch_child(&parent, node_index - 1)?;
                if can_redistribute(NodeView::new(&left.guard[..]).size()) {
                    drop(right);
                    (left, true)
                } else {
                    drop(left);
                    (right, false)
                }
            }
        };

        let sibling_size = NodeView::new(&sibling.guard[..]).size();
        if can_redistribute(sibling_size) {
            sibling.page.mark_dirty();
            parent.page.mark_dirty();
            self.redistribute(&mut sibling, node, from_left, node_index, &mut parent)?;
            drop(sibling);
            drop(parent);
            return Ok(());
        }

        // Coalesce: the left-hand page of the pair survives
        sibling.page.mark_dirty();
        parent.page.mark_dirty();
        if from_left {
            self.merge_into(node, &mut sibling, &parent, node_index, held_child)?;
            InternalNodeView::<_, K>::new(&mut parent.guard[..]).remove(node_index);
            txn.deleted_pages.insert(node_id);
            log::debug!("coalesced node {} into left sibling {}", node_id, sibling.page_id());
        } else {
            let sibling_id = sibling.page_id();
            self.merge_into(&mut sibling, node, &parent, node_index + 1, None)?;
            InternalNodeView::<_, K>::new(&mut parent.guard[..]).remove(node_index + 1);
            txn.deleted_pages.insert(sibling_id);
            log::debug!("coalesced right sibling {} into node {}", sibling_id, node_id);
        }

        let (parent_is_root, parent_size, parent_min) = {
            let parent_view = InternalNodeView::<_, K>::new(&parent.guard[..]);
            (
                parent_view.parent_page_id() == PageId::INVALID,
                parent_view.size(),
                parent_view.min_size(),
            )
        };

        if parent_is_root {
            // Root collapse promotes the surviving half of the merge,
            // which is still latched right here
            if parent_size == 1 {
                let parent_id = parent.page_id();
                let survivor = if from_left { &mut sibling } else { &mut *node };
                let promoted = InternalNodeView::<_, K>::new(&mut parent.guard[..])
                    .remove_and_return_only_child();
                debug_assert_eq!(promoted, survivor.page_id());
                NodeView::new(&mut survivor.guard[..]).set_parent_page_id(PageId::INVALID);

                let root_id = txn
                    .root_guard
                    .as_deref_mut()
                    .ok_or_else(|| corrupted("root latch not held at root collapse"))?;
                *root_id = promoted;
                self.persist_root_id(promoted)?;
                txn.deleted_pages.insert(parent_id);
                log::debug!("root collapsed; new root {}", promoted);
            }
            drop(sibling);
        } else {
            drop(sibling);
            if parent_size < parent_min {
                self.coalesce_or_redistribute(&mut parent, Some(node), txn)?;
            }
        }
        drop(parent);
        Ok(())
    }

    /// Moves every entry of `emptied` into `survivor` (its left
    /// neighbor). `separator_index` locates the parent key separating the
    /// pair; for leaves the survivor inherits the emptied page's former
    /// next pointer. A held child of `emptied` is repointed through its
    /// own guard rather than through the buffer pool.
    fn merge_into<'a>(
        &self,
        emptied: &mut LatchedPage<'a>,
        survivor: &mut LatchedPage<'a>,
        parent: &LatchedPage<'a>,
        separator_index: usize,
        held_child: Option<&mut LatchedPage<'a>>,
    ) -> Result<()> {
        if NodeView::new(&emptied.guard[..]).is_leaf() {
            let next = LeafNodeView::<_, K>::new(&emptied.guard[..]).next_page_id();
            let mut from = LeafNodeView::<_, K>::new(&mut emptied.guard[..]);
            let mut to = LeafNodeView::<_, K>::new(&mut survivor.guard[..]);
            from.move_all_to(&mut to);
            to.set_next_page_id(next);
            return Ok(());
        }

        let survivor_id = survivor.page_id();
        let held_id = held_child.as_ref().map(|held| held.page_id());
        {
            let middle_key =
                InternalNodeView::<_, K>::new(&parent.guard[..]).key_at(separator_index);
            let mut from = InternalNodeView::<_, K>::new(&mut emptied.guard[..]);
            let mut to = InternalNodeView::<_, K>::new(&mut survivor.guard[..]);
            from.move_all_to(&mut to, &middle_key, self.bpm.as_ref(), held_id)?;
        }
        if let Some(held) = held_child {
            let moved = InternalNodeView::<_, K>::new(&survivor.guard[..])
                .value_index(held.page_id())
                .is_some();
            if moved {
                NodeView::new(&mut held.guard[..]).set_parent_page_id(survivor_id);
            }
        }
        Ok(())
    }

    /// Moves one entry between an underflowing `node` and its `neighbor`,
    /// updating the separating key in `parent`. `from_left` says which
    /// side the neighbor is on; `node_index` is `node`'s position among
    /// the parent's children.
    fn redistribute<'a>(
        &self,
        neighbor: &mut LatchedPage<'a>,
        node: &mut LatchedPage<'a>,
        from_left: bool,
        node_index: usize,
        parent: &mut LatchedPage<'a>,
    ) -> Result<()> {
        if NodeView::new(&node.guard[..]).is_leaf() {
            if from_left {
                {
                    let mut neighbor_view = LeafNodeView::<_, K>::new(&mut neighbor.guard[..]);
                    let mut node_view = LeafNodeView::<_, K>::new(&mut node.guard[..]);
                    neighbor_view.move_last_to_front_of(&mut node_view);
                }
                let new_separator = LeafNodeView::<_, K>::new(&node.guard[..]).key_at(0);
                InternalNodeView::<_, K>::new(&mut parent.guard[..])
                    .set_key_at(node_index, &new_separator);
            } else {
                {
                    let mut neighbor_view = LeafNodeView::<_, K>::new(&mut neighbor.guard[..]);
                    let mut node_view = LeafNodeView::<_, K>::new(&mut node.guard[..]);
                    neighbor_view.move_first_to_end_of(&mut node_view);
                }
                let new_separator = LeafNodeView::<_, K>::new(&neighbor.guard[..]).key_at(0);
                InternalNodeView::<_, K>::new(&mut parent.guard[..])
                    .set_key_at(node_index + 1, &new_separator);
            }
            return Ok(());
        }

        if from_left {
            let neighbor_view = InternalNodeView::<_, K>::new(&neighbor.guard[..]);
            let new_separator = neighbor_view.key_at(neighbor_view.size() as usize - 1);
            let middle_key =
                InternalNodeView::<_, K>::new(&parent.guard[..]).key_at(node_index);
            {
                let mut neighbor_view = InternalNodeView::<_, K>::new(&mut neighbor.guard[..]);
                let mut node_view = InternalNodeView::<_, K>::new(&mut node.guard[..]);
                neighbor_view.move_last_to_front_of(&mut node_view, &middle_key, self.bpm.as_ref())?;
            }
            InternalNodeView::<_, K>::new(&mut parent.guard[..])
                .set_key_at(node_index, &new_separator);
        } else {
            let new_separator = InternalNodeView::<_, K>::new(&neighbor.guard[..]).key_at(1);
            let middle_key =
                InternalNodeView::<_, K>::new(&parent.guard[..]).key_at(node_index + 1);
            {
                let mut neighbor_view = InternalNodeView::<_, K>::new(&mut neighbor.guard[..]);
                let mut node_view = InternalNodeView::<_, K>::new(&mut node.guard[..]);
                neighbor_view.move_first_to_end_of(&mut node_view, &middle_key, self.bpm.as_ref())?;
            }
            InternalNodeView::<_, K>::new(&mut parent.guard[..])
                .set_key_at(node_index + 1, &new_separator);
        }
        Ok(())
    }

    /// Shrinks the tree when the root leaf runs empty: the root id is
    /// cleared and the page disposed of. Returns true when the old root
    /// page should be deleted. The other root adjustment (an internal root
    /// left with a single child) is handled inline by the coalesce path,
    /// where the promoted child's latch is already held.
    fn adjust_root<'a>(
        &'a self,
        root: &mut LatchedPage<'a>,
        txn: &mut Transaction<'a>,
    ) -> Result<bool> {
        let (is_leaf, size) = {
            let view = NodeView::new(&root.guard[..]);
            (view.is_leaf(), view.size())
        };

        if is_leaf && size == 0 {
            let root_id = txn
                .root_guard
                .as_deref_mut()
                .ok_or_else(|| corrupted("root latch not held at root collapse"))?;
            *root_id = PageId::INVALID;
            self.persist_root_id(PageId::INVALID)?;
            log::debug!("last key removed; tree is empty");
            return Ok(true);
        }

        Ok(false)
    }

    // =========================================================================
    // Descent machinery
    // =========================================================================

    /// Write-mode descent. Each hop write-latches the child before the
    /// parent is released; the whole ancestor chain (and the root-id
    /// latch, once the sweep crosses the root page) is dropped as soon as
    /// a safe node is found. Unsafe ancestors accumulate on the
    /// transaction, root-most first.
    fn find_leaf_write<'a>(
        &'a self,
        key: &K,
        op: Operation,
        txn: &mut Transaction<'a>,
    ) -> Result<LatchedPage<'a>> {
        let root_id = match txn.root_guard.as_deref() {
            Some(&id) => id,
            None => return Err(corrupted("write descent without the root latch")),
        };

        let mut cur_pin = match self.bpm.fetch_page_pinned(root_id) {
            Ok(pin) => pin,
            Err(e) => {
                self.release_ancestors(txn);
                return Err(e);
            }
        };

        loop {
            let cur_guard = cur_pin.frame().write_data();

            let (is_leaf, is_safe) = {
                let view = NodeView::new(&cur_guard[..]);
                let size = view.size();
                let is_leaf = view.is_leaf();
                let is_safe = match op {
                    Operation::Insert => {
                        if is_leaf {
                            size + 1 < view.max_size()
                        } else {
                            size + 1 <= view.max_size()
                        }
                    }
                    Operation::Delete => size - 1 >= view.min_size(),
                };
                (is_leaf, is_safe)
            };

            if is_safe {
                self.release_ancestors(txn);
            }
            if is_leaf {
                return Ok(LatchedPage {
                    guard: cur_guard,
                    page: cur_pin,
                });
            }

            let child_id =
                InternalNodeView::<_, K>::new(&cur_guard[..]).lookup(key, &self.comparator);
            txn.ancestors.push(LatchedPage {
                guard: cur_guard,
                page: cur_pin,
            });

            cur_pin = match self.bpm.fetch_page_pinned(child_id) {
                Ok(pin) => pin,
                Err(e) => {
                    self.release_ancestors(txn);
                    return Err(e);
                }
            };
        }
    }

    /// Releases every latched ancestor top-down, unpinning each clean:
    /// any ancestor a restructure mutated was marked dirty at the moment
    /// the restructure consumed it from the stack, so whatever is still
    /// here was never touched. Releasing the root page also releases the
    /// root-id latch.
    fn release_ancestors(&self, txn: &mut Transaction<'_>) {
        for latched in txn.ancestors.drain(..) {
            let is_root = NodeView::new(&latched.guard[..]).is_root();
            drop(latched);
            if is_root {
                txn.root_guard.take();
            }
        }
    }

    /// Write-latches and pins the `index`-th child of `parent`.
    fn latch_child<'a>(
        &'a self,
        parent: &LatchedPage<'a>,
        index: usize,
    ) -> Result<LatchedPage<'a>> {
        let child_id = InternalNodeView::<_, K>::new(&parent.guard[..]).value_at(index);
        let pin = self.bpm.fetch_page_pinned(child_id)?;
        let guard = pin.frame().write_data();
        Ok(LatchedPage { guard, page: pin })
    }

    /// Rewrites this index's root record in the header page.
    fn persist_root_id(&self, root_id: PageId) -> Result<()> {
        let mut header = self.bpm.fetch_page_pinned(HEADER_PAGE_ID)?;
        {
            let mut data = header.frame().write_data();
            let mut view = HeaderPageView::new(&mut data[..]);
            if !view.update_record(&self.index_name, root_id)
                && !view.insert_record(&self.index_name, root_id)
            {
                return Err(OxbowError::HeaderPageFull);
            }
        }
        header.mark_dirty();
        Ok(())
    }

    // =========================================================================
    // Iteration
    // =========================================================================

    /// Iterator over the whole tree in ascending key order.
    pub fn begin(&self) -> Result<TreeIterator<'_, K>> {
        match self.find_leaf_read(None)? {
            None => Ok(TreeIterator::end(self.bpm.as_ref())),
            Some((_guard, pin)) => Ok(TreeIterator::new(self.bpm.as_ref(), pin.page_id(), 0)),
        }
    }

    /// Iterator positioned at the first key `>= key`.
    pub fn begin_at(&self, key: &K) -> Result<TreeIterator<'_, K>> {
        match self.find_leaf_read(Some(key))? {
            None => Ok(TreeIterator::end(self.bpm.as_ref())),
            Some((guard, pin)) => {
                let index = LeafNodeView::<_, K>::new(&guard[..]).key_index(key, &self.comparator);
                Ok(TreeIterator::new(self.bpm.as_ref(), pin.page_id(), index))
            }
        }
    }

    /// The past-the-end iterator.
    pub fn end(&self) -> TreeIterator<'_, K> {
        TreeIterator::end(self.bpm.as_ref())
    }

    // =========================================================================
    // Debug dumps
    // =========================================================================

    /// Renders the tree as Graphviz dot.
    pub fn to_graph(&self) -> Result<String> {
        let mut out = String::from("digraph BPlusTree {\n");
        let root_guard = self.root.read();
        if root_guard.is_valid() {
            self.graph_node(*root_guard, &mut out)?;
        }
        out.push_str("}\n");
        Ok(out)
    }

    fn graph_node(&self, page_id: PageId, out: &mut String) -> Result<()> {
        let page = self.bpm.fetch_page_pinned(page_id)?;
        let data = page.frame().read_data();

        if NodeView::new(&data[..]).is_leaf() {
            let leaf = LeafNodeView::<_, K>::new(&data[..]);
            let keys: Vec<String> = (0..leaf.size() as usize)
                .map(|i| format!("{:?}", leaf.key_at(i)))
                .collect();
            let _ = writeln!(
                out,
                "  leaf_{} [shape=record label=\"P={}|{}\"];",
                page_id.0,
                page_id,
                keys.join("|")
            );
            if leaf.next_page_id().is_valid() {
                let _ = writeln!(
                    out,
                    "  leaf_{} -> leaf_{} [style=dashed];",
                    page_id.0,
                    leaf.next_page_id().0
                );
            }
            return Ok(());
        }

        let internal = InternalNodeView::<_, K>::new(&data[..]);
        let size = internal.size() as usize;
        let mut label = format!("P={}", page_id);
        let mut children = Vec::with_capacity(size);
        for i in 0..size {
            if i > 0 {
                let _ = write!(label, "|{:?}", internal.key_at(i));
            }
            children.push(internal.value_at(i));
        }
        let _ = writeln!(
            out,
            "  int_{} [shape=record label=\"{}\"];",
            page_id.0, label
        );
        drop(data);
        drop(page);

        for child_id in children {
            let prefix = {
                let child = self.bpm.fetch_page_pinned(child_id)?;
                let child_data = child.frame().read_data();
                if NodeView::new(&child_data[..]).is_leaf() {
                    "leaf"
                } else {
                    "int"
                }
            };
            let _ = writeln!(out, "  int_{} -> {}_{};", page_id.0, prefix, child_id.0);
            self.graph_node(child_id, out)?;
        }
        Ok(())
    }

    /// Renders the tree as indented text, one node per line.
    pub fn to_string_tree(&self) -> Result<String> {
        let mut out = String::new();
        let root_guard = self.root.read();
        if root_guard.is_valid() {
            self.print_node(*root_guard, 0, &mut out)?;
        } else {
            out.push_str("<empty>\n");
        }
        Ok(out)
    }

    fn print_node(&self, page_id: PageId, depth: usize, out: &mut String) -> Result<()> {
        let page = self.bpm.fetch_page_pinned(page_id)?;
        let data = page.frame().read_data();
        let indent = "  ".repeat(depth);

        if NodeView::new(&data[..]).is_leaf() {
            let leaf = LeafNodeView::<_, K>::new(&data[..]);
            let keys: Vec<String> = (0..leaf.size() as usize)
                .map(|i| format!("{:?}", leaf.key_at(i)))
                .collect();
            let _ = writeln!(
                out,
                "{}leaf {} parent={} next={}: [{}]",
                indent,
                page_id,
                leaf.parent_page_id(),
                leaf.next_page_id(),
                keys.join(", ")
            );
            return Ok(());
        }

        let internal = InternalNodeView::<_, K>::new(&data[..]);
        let size = internal.size() as usize;
        let mut parts = Vec::with_capacity(size);
        let mut children = Vec::with_capacity(size);
        for i in 0..size {
            if i == 0 {
                parts.push(format!("<{}>", internal.value_at(i)));
            } else {
                parts.push(format!("{:?} <{}>", internal.key_at(i), internal.value_at(i)));
            }
            children.push(internal.value_at(i));
        }
        let _ = writeln!(
            out,
            "{}internal {} parent={}: {}",
            indent,
            page_id,
            internal.parent_page_id(),
            parts.join(" ")
        );
        drop(data);
        drop(page);

        for child_id in children {
            self.print_node(child_id, depth + 1, out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{GenericComparator, GenericKey};
    use oxbow_common::StorageConfig;
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

    fn test_tree(
        pool_size: usize,
        leaf_max: i32,
        internal_max: i32,
    ) -> (Tree, Arc<BufferPoolManager>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            data_path: dir.path().join("tree.db"),
            buffer_pool_frames: pool_size,
            fsync_enabled: false,
            ..Default::default()
        };
        let disk = Arc::new(DiskManager::new(config.clone()).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(&config, disk));
        let tree = Tree::new(
            "test_index",
            Arc::clone(&bpm),
            GenericComparator,
            leaf_max,
            internal_max,
        )
        .unwrap();
        (tree, bpm, dir)
    }

    #[test]
    fn test_tree_new_validation() {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            data_path: dir.path().join("v.db"),
            buffer_pool_frames: 8,
            fsync_enabled: false,
            ..Default::default()
        };
        let disk = Arc::new(DiskManager::new(config.clone()).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(&config, disk));

        assert!(Tree::new("", Arc::clone(&bpm), GenericComparator, 3, 3).is_err());
        assert!(Tree::new("ok", Arc::clone(&bpm), GenericComparator, 1, 3).is_err());
        assert!(Tree::new("ok", Arc::clone(&bpm), GenericComparator, 3, 100_000).is_err());
        assert!(Tree::with_default_sizes("ok", bpm, GenericComparator).is_ok());
    }

    #[test]
    fn test_tree_empty() {
        let (tree, _bpm, _dir) = test_tree(16, 3, 3);

        assert!(tree.is_empty());
        assert_eq!(tree.height().unwrap(), 0);
        assert_eq!(tree.get_value(&key(1)).unwrap(), None);

        let mut txn = Transaction::new();
        tree.remove(&key(1), &mut txn).unwrap();
        assert!(tree.is_empty());
    }

    #[test]
    fn test_tree_single_insert_get() {
        let (tree, _bpm, _dir) = test_tree(16, 3, 3);

        let mut txn = Transaction::new();
        assert!(tree.insert(key(42), rid(42), &mut txn).unwrap());
        assert!(!tree.is_empty());
        assert_eq!(tree.height().unwrap(), 0);
        assert_eq!(tree.get_value(&key(42)).unwrap(), Some(rid(42)));
        assert_eq!(tree.get_value(&key(41)).unwrap(), None);
    }

    #[test]
    fn test_tree_duplicate_insert() {
        let (tree, _bpm, _dir) = test_tree(16, 3, 3);

        let mut txn = Transaction::new();
        assert!(tree.insert(key(7), rid(7), &mut txn).unwrap());
        assert!(!tree.insert(key(7), rid(99), &mut txn).unwrap());
        assert_eq!(tree.get_value(&key(7)).unwrap(), Some(rid(7)));
    }

    #[test]
    fn test_tree_sequential_inserts_split() {
        let (tree, _bpm, _dir) = test_tree(32, 3, 3);

        let mut txn = Transaction::new();
        for v in 1..=10 {
            assert!(tree.insert(key(v), rid(v), &mut txn).unwrap(), "insert {}", v);
        }

        for v in 1..=10 {
            assert_eq!(tree.get_value(&key(v)).unwrap(), Some(rid(v)), "get {}", v);
        }
        assert_eq!(tree.get_value(&key(11)).unwrap(), None);
        assert!(tree.height().unwrap() >= 1);
    }

    #[test]
    fn test_tree_reverse_inserts() {
        let (tree, _bpm, _dir) = test_tree(32, 3, 3);

        let mut txn = Transaction::new();
        for v in (1..=20).rev() {
            assert!(tree.insert(key(v), rid(v), &mut txn).unwrap());
        }
        for v in 1..=20 {
            assert_eq!(tree.get_value(&key(v)).unwrap(), Some(rid(v)));
        }
    }

    #[test]
    fn test_tree_remove_simple() {
        let (tree, _bpm, _dir) = test_tree(16, 3, 3);

        let mut txn = Transaction::new();
        for v in 1..=3 {
            tree.insert(key(v), rid(v), &mut txn).unwrap();
        }

        tree.remove(&key(2), &mut txn).unwrap();
        assert_eq!(tree.get_value(&key(2)).unwrap(), None);
        assert_eq!(tree.get_value(&key(1)).unwrap(), Some(rid(1)));
        assert_eq!(tree.get_value(&key(3)).unwrap(), Some(rid(3)));

        // Removing an absent key is a no-op
        tree.remove(&key(2), &mut txn).unwrap();
        assert_eq!(tree.get_value(&key(1)).unwrap(), Some(rid(1)));
    }

    #[test]
    fn test_tree_drain_to_empty() {
        let (tree, _bpm, _dir) = test_tree(32, 3, 3);

        let mut txn = Transaction::new();
        for v in 1..=10 {
            tree.insert(key(v), rid(v), &mut txn).unwrap();
        }
        for v in 1..=10 {
            tree.remove(&key(v), &mut txn).unwrap();
            assert_eq!(tree.get_value(&key(v)).unwrap(), None, "removed {}", v);
        }

        assert!(tree.is_empty());
        assert_eq!(tree.height().unwrap(), 0);

        // The tree is usable again after going empty
        assert!(tree.insert(key(5), rid(5), &mut txn).unwrap());
        assert_eq!(tree.get_value(&key(5)).unwrap(), Some(rid(5)));
    }

    #[test]
    fn test_tree_root_collapse_updates_parent() {
        let (tree, bpm, _dir) = test_tree(32, 3, 3);

        let mut txn = Transaction::new();
        for v in 1..=10 {
            tree.insert(key(v), rid(v), &mut txn).unwrap();
        }
        assert!(tree.height().unwrap() >= 1);

        for v in 1..=9 {
            tree.remove(&key(v), &mut txn).unwrap();
        }
        assert_eq!(tree.height().unwrap(), 0);

        // The surviving root is parentless and recorded in the header page
        let root_id = *tree.root.read();
        {
            let page = bpm.fetch_page_pinned(root_id).unwrap();
            let data = page.frame().read_data();
            assert!(NodeView::new(&data[..]).is_root());
        }
        {
            let header = bpm.fetch_page_pinned(HEADER_PAGE_ID).unwrap();
            let data = header.frame().read_data();
            assert_eq!(
                HeaderPageView::new(&data[..]).get_record("test_index"),
                Some(root_id)
            );
        }
    }

    #[test]
    fn test_tree_no_pins_leak() {
        let (tree, bpm, _dir) = test_tree(32, 3, 3);

        let mut txn = Transaction::new();
        for v in 1..=50 {
            tree.insert(key(v), rid(v), &mut txn).unwrap();
        }
        for v in (1..=50).step_by(2) {
            tree.remove(&key(v), &mut txn).unwrap();
        }
        for v in 1..=50 {
            tree.get_value(&key(v)).unwrap();
        }

        assert_eq!(bpm.stats().pinned_frames, 0);
    }

    #[test]
    fn test_tree_persistent_root_reopen() {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            data_path: dir.path().join("reopen.db"),
            buffer_pool_frames: 16,
            fsync_enabled: false,
            ..Default::default()
        };
        let disk = Arc::new(DiskManager::new(config.clone()).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(&config, disk));

        {
            let tree =
                Tree::new("orders", Arc::clone(&bpm), GenericComparator, 4, 4).unwrap();
            let mut txn = Transaction::new();
            for v in 1..=8 {
                tree.insert(key(v), rid(v), &mut txn).unwrap();
            }
        }

        // A second handle over the same pool sees the persisted root
        let tree = Tree::new("orders", Arc::clone(&bpm), GenericComparator, 4, 4).unwrap();
        assert!(!tree.is_empty());
        for v in 1..=8 {
            assert_eq!(tree.get_value(&key(v)).unwrap(), Some(rid(v)));
        }
    }

    #[test]
    fn test_tree_random_permutation_law() {
        use rand::seq::SliceRandom;

        let (tree, _bpm, _dir) = test_tree(64, 4, 4);
        let mut rng = rand::thread_rng();

        let mut keys: Vec<i64> = (1..=200).collect();
        keys.shuffle(&mut rng);

        let mut txn = Transaction::new();
        for &v in &keys {
            assert!(tree.insert(key(v), rid(v), &mut txn).unwrap());
        }

        let mut removed: Vec<i64> = keys.iter().copied().filter(|v| v % 3 == 0).collect();
        removed.shuffle(&mut rng);
        for &v in &removed {
            tree.remove(&key(v), &mut txn).unwrap();
        }

        for v in 1..=200 {
            let expected = if v % 3 == 0 { None } else { Some(rid(v)) };
            assert_eq!(tree.get_value(&key(v)).unwrap(), expected, "key {}", v);
        }
    }

    #[test]
    fn test_tree_debug_dumps() {
        let (tree, _bpm, _dir) = test_tree(32, 3, 3);

        assert!(tree.to_string_tree().unwrap().contains("<empty>"));

        let mut txn = Transaction::new();
        for v in 1..=10 {
            tree.insert(key(v), rid(v), &mut txn).unwrap();
        }

        let dot = tree.to_graph().unwrap();
        assert!(dot.starts_with("digraph"));
        assert!(dot.contains("leaf_"));
        assert!(dot.contains("int_"));

        let text = tree.to_string_tree().unwrap();
        assert!(text.contains("internal"));
        assert!(text.contains("leaf"));
    }
}
