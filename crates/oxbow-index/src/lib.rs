//! B+ tree index for OxbowDB.
//!
//! This crate provides:
//! - Fixed-width key and comparator abstractions
//! - Leaf and internal node page layouts over buffer pool pages
//! - A clustered B+ tree with latch-crabbing concurrency control
//! - Forward range iteration over the leaf chain

mod iterator;
mod key;
mod node;
mod transaction;
mod tree;

pub use iterator::TreeIterator;
pub use key::{GenericComparator, GenericKey, IndexKey, KeyComparator};
pub use node::{
    internal_capacity, leaf_capacity, InternalNodeView, LeafNodeView, NodeType, NodeView,
    LEAF_HEADER_LEN, NODE_HEADER_LEN,
};
pub use transaction::Transaction;
pub use tree::BPlusTree;
