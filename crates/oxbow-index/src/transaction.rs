//! Per-operation context for tree writes.

use parking_lot::RwLockWriteGuard;
use std::collections::HashSet;

use oxbow_buffer::{PageBuf, PinnedPage};
use oxbow_common::page::PageId;

/// A page held by a descending write operation: pinned and write-latched.
///
/// Field order matters: the latch guard drops before the pin, so a page is
/// always unlatched before it becomes evictable.
pub(crate) struct LatchedPage<'a> {
    /// Page latch, held exclusive.
    pub(crate) guard: RwLockWriteGuard<'a, PageBuf>,
    /// Pin released on drop.
    pub(crate) page: PinnedPage<'a>,
}

impl LatchedPage<'_> {
    pub(crate) fn page_id(&self) -> PageId {
        self.page.page_id()
    }
}

/// Context threaded through `insert` and `remove`.
///
/// Carries the ordered chain of write-latched ancestors (root-most first),
/// the set of pages emptied by coalescing or root collapse awaiting
/// disposal, and the tree's root-id latch guard while the operation owns
/// it. Latch-crabbing releases ancestors through this context as soon as a
/// safe node is reached.
#[derive(Default)]
pub struct Transaction<'a> {
    pub(crate) ancestors: Vec<LatchedPage<'a>>,
    pub(crate) deleted_pages: HashSet<PageId>,
    pub(crate) root_guard: Option<RwLockWriteGuard<'a, PageId>>,
}

impl<'a> Transaction<'a> {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ancestors currently held latched.
    pub fn latched_ancestors(&self) -> usize {
        self.ancestors.len()
    }

    /// Pages queued for disposal at the end of the current operation.
    pub fn deleted_pages(&self) -> &HashSet<PageId> {
        &self.deleted_pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_starts_empty() {
        let txn = Transaction::new();
        assert_eq!(txn.latched_ancestors(), 0);
        assert!(txn.deleted_pages().is_empty());
        assert!(txn.root_guard.is_none());
    }
}
