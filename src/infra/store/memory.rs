//! In-memory blob store for tests and ephemeral deployments.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use super::{ObjectStore, StoreError, StoredObject};

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: DashMap<String, Bytes>,
    puts: AtomicU64,
    public_url_prefix: Option<String>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_public_url_prefix(prefix: impl Into<String>) -> Self {
        Self {
            public_url_prefix: Some(prefix.into().trim_end_matches('/').to_string()),
            ..Self::default()
        }
    }

    /// Number of `put` calls served so far. Lets tests assert that repeated
    /// acquisition passes perform no duplicate blob writes.
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        _content_type: &str,
    ) -> Result<StoredObject, StoreError> {
        self.puts.fetch_add(1, Ordering::Relaxed);
        let size_bytes = data.len() as i64;
        self.objects.insert(key.to_string(), data);
        Ok(StoredObject {
            key: key.to_string(),
            size_bytes,
            public_url: self.public_url(key),
        })
    }

    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        self.objects
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.objects.contains_key(key))
    }

    async fn stat(&self, key: &str) -> Result<Option<u64>, StoreError> {
        Ok(self.objects.get(key).map(|entry| entry.value().len() as u64))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.objects.remove(key);
        Ok(())
    }

    fn public_url(&self, key: &str) -> Option<String> {
        self.public_url_prefix
            .as_ref()
            .map(|prefix| format!("{prefix}/{key}"))
    }
}
