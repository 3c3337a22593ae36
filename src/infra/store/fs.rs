//! Filesystem-backed blob store.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;

use super::{ObjectStore, StoreError, StoredObject};

/// Blob store rooted at a local directory. Keys map directly to relative
/// paths; parent-directory and absolute components are rejected.
#[derive(Debug)]
pub struct FsObjectStore {
    root: PathBuf,
    public_url_prefix: Option<String>,
}

impl FsObjectStore {
    /// Initialise storage rooted at the provided directory, creating it if
    /// necessary.
    pub fn new(root: PathBuf, public_url_prefix: Option<String>) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            public_url_prefix: public_url_prefix
                .map(|prefix| prefix.trim_end_matches('/').to_string()),
        })
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        if key.is_empty()
            || relative.is_absolute()
            || relative
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(StoreError::InvalidKey {
                key: key.to_string(),
            });
        }

        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        _content_type: &str,
    ) -> Result<StoredObject, StoreError> {
        let absolute = self.resolve(key)?;
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await?;
        }

        let size_bytes = data.len() as i64;
        fs::write(&absolute, &data).await?;

        Ok(StoredObject {
            key: key.to_string(),
            size_bytes,
            public_url: self.public_url(key),
        })
    }

    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        let absolute = self.resolve(key)?;
        match fs::read(&absolute).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                key: key.to_string(),
            }),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let absolute = self.resolve(key)?;
        Ok(fs::try_exists(&absolute).await?)
    }

    async fn stat(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let absolute = self.resolve(key)?;
        match fs::metadata(&absolute).await {
            Ok(metadata) => Ok(Some(metadata.len())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let absolute = self.resolve(key)?;
        match fs::remove_file(&absolute).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    fn public_url(&self, key: &str) -> Option<String> {
        self.public_url_prefix
            .as_ref()
            .map(|prefix| format!("{prefix}/{key}"))
    }
}
