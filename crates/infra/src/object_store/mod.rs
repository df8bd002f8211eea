//! Blob storage for raw document bytes.
//!
//! Keys look like `{tenant}/{job}/{file}`; see `docintel_documents::object_key`.

use bytes::Bytes;

pub mod filesystem;
pub mod in_memory;

pub use filesystem::FilesystemObjectStore;
pub use in_memory::InMemoryObjectStore;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObjectStoreError {
    #[error("invalid object key: {0}")]
    InvalidKey(String),
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("object store io error: {0}")]
    Io(String),
}

#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write bytes under `key`, replacing any previous object. Returns a version tag.
    async fn put(&self, key: &str, bytes: Bytes) -> Result<String, ObjectStoreError>;

    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError>;

    /// Addressable reference handed to the analysis service.
    fn url(&self, key: &str) -> Result<String, ObjectStoreError>;

    /// Remove an object. Deleting a missing object is not an error.
    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;

    async fn ping(&self) -> Result<(), ObjectStoreError>;
}

/// Reject keys that could escape the store root.
pub fn validate_key(key: &str) -> Result<(), ObjectStoreError> {
    if key.is_empty() || key.starts_with('/') || key.contains('\\') {
        return Err(ObjectStoreError::InvalidKey(key.to_string()));
    }
    if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(ObjectStoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Version tag for stored bytes (content digest).
pub(crate) fn version_tag(bytes: &[u8]) -> String {
    docintel_core::ContentHash::of(bytes).to_string()
}

pub(crate) fn join_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_cannot_escape_root() {
        assert!(validate_key("t1/0190/receipt.pdf").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("t1/../t2/x").is_err());
        assert!(validate_key("t1//x").is_err());
        assert!(validate_key("t1\\x").is_err());
    }

    #[test]
    fn urls_join_without_double_slashes() {
        assert_eq!(join_url("https://blob/", "t/j/f.pdf"), "https://blob/t/j/f.pdf");
        assert_eq!(join_url("memory://documents", "a/b/c"), "memory://documents/a/b/c");
    }
}
