//! Page replacement policies for the buffer pool.

use parking_lot::Mutex;

use crate::frame::FrameId;

/// Trait for page replacement algorithms.
///
/// A replacer tracks unpinned frames and picks which one to evict when the
/// pool needs a slot. Implementations must make every method atomic with
/// respect to the others.
pub trait Replacer: Send + Sync {
    /// Removes and returns the eviction victim, if any frame is tracked.
    fn victim(&self) -> Option<FrameId>;

    /// Stops tracking a frame. Called when a page's pin count rises above
    /// zero. No-op if the frame is not tracked.
    fn pin(&self, frame_id: FrameId);

    /// Starts tracking a frame as most recently unpinned. Called only on
    /// the transition to pin count zero. No-op (no reordering) if the frame
    /// is already tracked or the replacer is at capacity.
    fn unpin(&self, frame_id: FrameId);

    /// Returns the number of tracked frames.
    fn len(&self) -> usize;

    /// Returns true if no frame is tracked.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sentinel index for list ends.
const NIL: usize = usize::MAX;

/// LRU replacement policy.
///
/// Tracked frames form a doubly-linked list threaded through a fixed
/// per-frame link table, most-recently-unpinned at the head. Victim
/// selection pops the tail; pin unlinks in O(1) via the frame's own links.
pub struct LruReplacer {
    /// Maximum number of frames this replacer will track.
    capacity: usize,
    /// List state, guarded for standalone atomicity.
    inner: Mutex<LruInner>,
}

struct LruInner {
    links: Vec<Link>,
    head: usize,
    tail: usize,
    len: usize,
}

#[derive(Clone, Copy)]
struct Link {
    prev: usize,
    next: usize,
    tracked: bool,
}

impl LruReplacer {
    /// Creates a new LRU replacer for `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(LruInner {
                links: vec![
                    Link {
                        prev: NIL,
                        next: NIL,
                        tracked: false,
                    };
                    capacity
                ],
                head: NIL,
                tail: NIL,
                len: 0,
            }),
        }
    }

    /// Returns the capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl LruInner {
    fn unlink(&mut self, idx: usize) {
        let Link { prev, next, .. } = self.links[idx];

        if prev == NIL {
            self.head = next;
        } else {
            self.links[prev].next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.links[next].prev = prev;
        }

        self.links[idx] = Link {
            prev: NIL,
            next: NIL,
            tracked: false,
        };
        self.len -= 1;
    }

    fn push_front(&mut self, idx: usize) {
        self.links[idx] = Link {
            prev: NIL,
            next: self.head,
            tracked: true,
        };
        if self.head != NIL {
            self.links[self.head].prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
        self.len += 1;
    }
}

impl Replacer for LruReplacer {
    fn victim(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        if inner.len == 0 {
            return None;
        }

        let idx = inner.tail;
        inner.unlink(idx);
        Some(FrameId(idx as u32))
    }

    fn pin(&self, frame_id: FrameId) {
        let idx = frame_id.0 as usize;
        if idx >= self.capacity {
            return;
        }

        let mut inner = self.inner.lock();
        if inner.links[idx].tracked {
            inner.unlink(idx);
        }
    }

    fn unpin(&self, frame_id: FrameId) {
        let idx = frame_id.0 as usize;
        if idx >= self.capacity {
            return;
        }

        let mut inner = self.inner.lock();
        if inner.links[idx].tracked || inner.len >= self.capacity {
            return;
        }
        inner.push_front(idx);
    }

    fn len(&self) -> usize {
        self.inner.lock().len
    }
}
