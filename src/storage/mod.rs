// Object storage for batch translation
//
// Containers group named text blobs. Two implementations share one trait:
// - Filesystem: containers are directories under a root, shared by every process on the host
// - Memory: single-process map, used for tests and dry runs

pub mod filesystem;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::StorageConfig;
use crate::error::{Result, TandemError};

pub use filesystem::FsObjectStore;
pub use memory::MemoryObjectStore;

/// Listing entry for one blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobInfo {
    pub name: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list_containers(&self) -> Result<Vec<String>>;

    /// List plain-text blobs in a container, optionally restricted to a name prefix.
    async fn list_blobs(&self, container: &str, prefix: Option<&str>) -> Result<Vec<BlobInfo>>;

    async fn read_blob(&self, container: &str, name: &str) -> Result<String>;

    /// Write a blob. With `overwrite` set, an existing blob is replaced, so repeated
    /// writes of the same content leave the store in the same state.
    async fn write_blob(&self, container: &str, name: &str, content: &str, overwrite: bool)
        -> Result<()>;

    async fn ensure_container_exists(&self, container: &str) -> Result<()>;

    async fn container_exists(&self, container: &str) -> Result<bool>;

    async fn blob_exists(&self, container: &str, name: &str) -> Result<bool>;
}

/// Factory for creating object store instances
pub struct ObjectStoreFactory;

impl ObjectStoreFactory {
    pub fn create(config: &StorageConfig) -> Arc<dyn ObjectStore> {
        Arc::new(FsObjectStore::new(&config.root, &config.text_extension))
    }
}

pub(crate) fn validate_container_name(container: &str) -> Result<()> {
    if container.is_empty()
        || container == "."
        || container == ".."
        || container.contains(['/', '\\'])
    {
        return Err(TandemError::Validation(format!(
            "Invalid container name: {:?}",
            container
        )));
    }
    Ok(())
}

pub(crate) fn validate_blob_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name.starts_with('/')
        || name.contains('\\')
        || name.split('/').any(|part| part.is_empty() || part == "." || part == "..");
    if invalid {
        return Err(TandemError::Validation(format!("Invalid blob name: {:?}", name)));
    }
    Ok(())
}

pub(crate) fn has_extension(name: &str, extension: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case(extension))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_names() {
        assert!(validate_container_name("source-texts").is_ok());
        assert!(validate_container_name("").is_err());
        assert!(validate_container_name("..").is_err());
        assert!(validate_container_name("a/b").is_err());
    }

    #[test]
    fn test_blob_names() {
        assert!(validate_blob_name("doc.txt").is_ok());
        assert!(validate_blob_name("nmt/doc.txt").is_ok());
        assert!(validate_blob_name("/etc/passwd").is_err());
        assert!(validate_blob_name("nmt/../../doc.txt").is_err());
        assert!(validate_blob_name("nmt//doc.txt").is_err());
    }

    #[test]
    fn test_extension_filter() {
        assert!(has_extension("a/b/doc.TXT", "txt"));
        assert!(!has_extension("doc.pdf", "txt"));
        assert!(!has_extension("README", "txt"));
    }
}
