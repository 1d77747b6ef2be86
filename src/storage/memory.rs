use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{has_extension, validate_blob_name, validate_container_name, BlobInfo, ObjectStore};
use crate::error::{Result, TandemError};

#[derive(Debug, Clone)]
struct StoredBlob {
    content: String,
    last_modified: DateTime<Utc>,
}

/// In-process object store. Contents vanish with the process.
pub struct MemoryObjectStore {
    containers: Mutex<BTreeMap<String, BTreeMap<String, StoredBlob>>>,
    extension: String,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            containers: Mutex::new(BTreeMap::new()),
            extension: "txt".to_string(),
        }
    }

    /// Store a blob synchronously, creating its container if needed.
    pub fn insert(&self, container: &str, name: &str, content: &str) {
        let mut containers = self.containers.lock().unwrap_or_else(|e| e.into_inner());
        containers.entry(container.to_string()).or_default().insert(
            name.to_string(),
            StoredBlob {
                content: content.to_string(),
                last_modified: Utc::now(),
            },
        );
    }

    /// Content of a blob, if present.
    pub fn get(&self, container: &str, name: &str) -> Option<String> {
        let containers = self.containers.lock().unwrap_or_else(|e| e.into_inner());
        containers
            .get(container)
            .and_then(|blobs| blobs.get(name))
            .map(|blob| blob.content.clone())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list_containers(&self) -> Result<Vec<String>> {
        let containers = self.containers.lock().unwrap_or_else(|e| e.into_inner());
        Ok(containers.keys().cloned().collect())
    }

    async fn list_blobs(&self, container: &str, prefix: Option<&str>) -> Result<Vec<BlobInfo>> {
        let containers = self.containers.lock().unwrap_or_else(|e| e.into_inner());
        let blobs = containers
            .get(container)
            .ok_or_else(|| TandemError::NotFound(format!("container '{}'", container)))?;

        Ok(blobs
            .iter()
            .filter(|(name, _)| has_extension(name, &self.extension))
            .filter(|(name, _)| prefix.is_none_or(|p| name.starts_with(p)))
            .map(|(name, blob)| BlobInfo {
                name: name.clone(),
                size: blob.content.len() as u64,
                last_modified: Some(blob.last_modified),
            })
            .collect())
    }

    async fn read_blob(&self, container: &str, name: &str) -> Result<String> {
        self.get(container, name)
            .ok_or_else(|| TandemError::NotFound(format!("blob '{}/{}'", container, name)))
    }

    async fn write_blob(
        &self,
        container: &str,
        name: &str,
        content: &str,
        overwrite: bool,
    ) -> Result<()> {
        validate_container_name(container)?;
        validate_blob_name(name)?;
        if !overwrite && self.get(container, name).is_some() {
            return Err(TandemError::AlreadyExists(format!("blob '{}/{}'", container, name)));
        }
        self.insert(container, name, content);
        Ok(())
    }

    async fn ensure_container_exists(&self, container: &str) -> Result<()> {
        validate_container_name(container)?;
        let mut containers = self.containers.lock().unwrap_or_else(|e| e.into_inner());
        containers.entry(container.to_string()).or_default();
        Ok(())
    }

    async fn container_exists(&self, container: &str) -> Result<bool> {
        let containers = self.containers.lock().unwrap_or_else(|e| e.into_inner());
        Ok(containers.contains_key(container))
    }

    async fn blob_exists(&self, container: &str, name: &str) -> Result<bool> {
        Ok(self.get(container, name).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prefix_and_extension_filtering() {
        let store = MemoryObjectStore::new();
        store.insert("out", "nmt/a.txt", "a");
        store.insert("out", "nmt/b.txt", "b");
        store.insert("out", "llm/a.txt", "a");
        store.insert("out", "image.png", "binary");

        assert_eq!(store.list_blobs("out", None).await.unwrap().len(), 3);
        assert_eq!(store.list_blobs("out", Some("nmt/")).await.unwrap().len(), 2);
        assert_eq!(store.list_blobs("out", Some("llm/")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_container_is_not_found() {
        let store = MemoryObjectStore::new();
        assert!(matches!(
            store.list_blobs("missing", None).await,
            Err(TandemError::NotFound(_))
        ));
    }
}
