//! Local-filesystem object store.
//!
//! Objects are written to a temporary sibling file and renamed into place, so a
//! reader never observes a partially written object.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::debug;

use super::{ObjectStore, ObjectStoreError, join_url, validate_key, version_tag};

#[derive(Debug, Clone)]
pub struct FilesystemObjectStore {
    root: PathBuf,
    /// Public prefix for object URLs; `file://` paths when unset
    base_url: Option<String>,
}

impl FilesystemObjectStore {
    /// Create the store, making sure `root` exists.
    pub async fn open(
        root: impl Into<PathBuf>,
        base_url: Option<String>,
    ) -> Result<Self, ObjectStoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await.map_err(io_error)?;
        Ok(Self { root, base_url })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, ObjectStoreError> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |p, seg| p.join(seg)))
    }
}

fn io_error(e: std::io::Error) -> ObjectStoreError {
    ObjectStoreError::Io(e.to_string())
}

#[async_trait::async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn put(&self, key: &str, bytes: Bytes) -> Result<String, ObjectStoreError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::now_v7()));
        tokio::fs::write(&tmp, &bytes).await.map_err(io_error)?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_error(e));
        }
        debug!(key, size = bytes.len(), "object written");
        Ok(version_tag(&bytes))
    }

    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ObjectStoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(io_error(e)),
        }
    }

    fn url(&self, key: &str) -> Result<String, ObjectStoreError> {
        let path = self.path_for(key)?;
        Ok(match &self.base_url {
            Some(base) => join_url(base, key),
            None => format!("file://{}", path.display()),
        })
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(e)),
        }
    }

    async fn ping(&self) -> Result<(), ObjectStoreError> {
        let meta = tokio::fs::metadata(&self.root).await.map_err(io_error)?;
        if meta.is_dir() {
            Ok(())
        } else {
            Err(ObjectStoreError::Io(format!(
                "{} is not a directory",
                self.root.display()
            )))
        }
    }
}
