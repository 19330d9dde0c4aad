//! Buffer pool management for OxbowDB.
//!
//! This crate provides in-memory page caching with:
//! - Fixed-size buffer pool with configurable frame count
//! - LRU eviction policy
//! - Pin counting for concurrent access
//! - Dirty page tracking with write-back on eviction
//! - Per-frame reader/writer page latches

mod frame;
mod pool;
mod replacer;

pub use frame::{BufferFrame, FrameId, PageBuf};
pub use pool::{BufferPoolManager, BufferPoolStats, PinnedPage};
pub use replacer::{LruReplacer, Replacer};
