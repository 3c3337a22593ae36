//! Content-addressable blob storage backends.

mod fs;
mod memory;

pub use fs::FsObjectStore;
pub use memory::MemoryObjectStore;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid storage key `{key}`")]
    InvalidKey { key: String },
    #[error("object `{key}` not found")]
    NotFound { key: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Metadata describing a stored blob.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub key: String,
    pub size_bytes: i64,
    pub public_url: Option<String>,
}

/// Byte-blob persistence keyed by a storage key.
///
/// Every write path layered on top of this contract is either
/// existence-checked or idempotent, so concurrent writers of the same key
/// converge on one object.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<StoredObject, StoreError>;

    async fn get(&self, key: &str) -> Result<Bytes, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Byte size of a stored object, `None` when absent. Lets metadata-only
    /// link writes record real sizes instead of a zero placeholder.
    async fn stat(&self, key: &str) -> Result<Option<u64>, StoreError>;

    /// Missing objects delete successfully.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    fn public_url(&self, key: &str) -> Option<String>;
}
