//! Error types for OxbowDB.

use thiserror::Error;

use crate::page::PageId;

/// Result type alias using OxbowError.
pub type Result<T> = std::result::Result<T, OxbowError>;

/// Errors that can occur in OxbowDB storage operations.
#[derive(Debug, Error)]
pub enum OxbowError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Buffer pool errors
    #[error("buffer pool exhausted of evictable frames")]
    BufferPoolFull,

    #[error("invalid page id passed where a valid id is required")]
    InvalidPageId,

    #[error("page not found: {page_id}")]
    PageNotFound { page_id: PageId },

    // Storage errors
    #[error("page corrupted: {page_id}, reason: {reason}")]
    PageCorrupted { page_id: PageId, reason: String },

    #[error("header page full, unable to insert record")]
    HeaderPageFull,

    // B+ tree errors
    #[error("B+ tree corrupted: {0}")]
    TreeCorrupted(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    ConfigError(String),
}
