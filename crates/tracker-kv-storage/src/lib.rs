//! Key-value storage abstraction for the tracker.
//!
//! This crate provides the durable slot the outbound queue mirrors itself
//! into so queued events survive a host restart:
//! - **`FileStorage`**: a single JSON object on disk
//! - **`MemoryStorage`**: process-local fallback, also the test double

mod file;
mod keys;
mod memory;
mod traits;

pub use file::FileStorage;
pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use traits::KeyValueStorage;

use std::path::Path;
use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Create the default durable storage implementation rooted at a directory.
///
/// Falls back to in-memory storage when the directory is not writable, so
/// persistence degrades rather than failing construction.
pub fn create_storage(dir: &Path) -> Box<dyn KeyValueStorage> {
    match FileStorage::open(dir.join("tracker-store.json")) {
        Ok(storage) => Box::new(storage),
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Falling back to in-memory storage");
            Box::new(MemoryStorage::new())
        }
    }
}
