//! In-memory object store for tests/dev.

use std::collections::HashMap;
use std::sync::RwLock;

use bytes::Bytes;

use super::{ObjectStore, ObjectStoreError, join_url, validate_key, version_tag};
use crate::config::DEFAULT_OBJECT_STORE_BASE_URL;

#[derive(Debug)]
pub struct InMemoryObjectStore {
    base_url: String,
    objects: RwLock<HashMap<String, Bytes>>,
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new(DEFAULT_OBJECT_STORE_BASE_URL)
    }
}

impl InMemoryObjectStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            objects: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects
            .read()
            .map(|o| o.contains_key(key))
            .unwrap_or(false)
    }
}

fn poisoned() -> ObjectStoreError {
    ObjectStoreError::Io("object store lock poisoned".to_string())
}

#[async_trait::async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &str, bytes: Bytes) -> Result<String, ObjectStoreError> {
        validate_key(key)?;
        let tag = version_tag(&bytes);
        self.objects
            .write()
            .map_err(|_| poisoned())?
            .insert(key.to_string(), bytes);
        Ok(tag)
    }

    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        validate_key(key)?;
        self.objects
            .read()
            .map_err(|_| poisoned())?
            .get(key)
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))
    }

    fn url(&self, key: &str) -> Result<String, ObjectStoreError> {
        validate_key(key)?;
        Ok(join_url(&self.base_url, key))
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        validate_key(key)?;
        self.objects.write().map_err(|_| poisoned())?.remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<(), ObjectStoreError> {
        self.objects.read().map(|_| ()).map_err(|_| poisoned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete() {
        let store = InMemoryObjectStore::default();
        let tag = store
            .put("t1/j1/a.pdf", Bytes::from_static(b"test content"))
            .await
            .unwrap();
        assert_eq!(
            tag,
            "6ae8a75555209fd6c44157c0aed8016e763ff435a19cf186f76863140143ff72"
        );
        assert_eq!(
            store.get("t1/j1/a.pdf").await.unwrap(),
            Bytes::from_static(b"test content")
        );
        assert_eq!(
            store.url("t1/j1/a.pdf").unwrap(),
            "memory://documents/t1/j1/a.pdf"
        );

        store.delete("t1/j1/a.pdf").await.unwrap();
        store.delete("t1/j1/a.pdf").await.unwrap();
        assert!(matches!(
            store.get("t1/j1/a.pdf").await,
            Err(ObjectStoreError::NotFound(_))
        ));
        assert!(store.is_empty());
    }
}
