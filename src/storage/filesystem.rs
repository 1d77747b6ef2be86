use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::{has_extension, validate_blob_name, validate_container_name, BlobInfo, ObjectStore};
use crate::error::{Result, TandemError};

const TEMP_PREFIX: &str = ".tandem-tmp-";

/// Object store backed by a directory tree
pub struct FsObjectStore {
    root: PathBuf,
    extension: String,
}

impl FsObjectStore {
    pub fn new<P: AsRef<Path>>(root: P, extension: &str) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    fn container_path(&self, container: &str) -> Result<PathBuf> {
        validate_container_name(container)?;
        Ok(self.root.join(container))
    }

    fn blob_path(&self, container: &str, name: &str) -> Result<PathBuf> {
        validate_blob_name(name)?;
        let mut path = self.container_path(container)?;
        for part in name.split('/') {
            path.push(part);
        }
        Ok(path)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn list_containers(&self) -> Result<Vec<String>> {
        let mut containers = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(containers),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                containers.push(entry.file_name().to_string_lossy().to_string());
            }
        }

        containers.sort();
        Ok(containers)
    }

    async fn list_blobs(&self, container: &str, prefix: Option<&str>) -> Result<Vec<BlobInfo>> {
        let container_dir = self.container_path(container)?;
        if !container_dir.is_dir() {
            return Err(TandemError::NotFound(format!("container '{}'", container)));
        }

        let mut blobs = Vec::new();
        for entry in WalkDir::new(&container_dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                continue;
            }

            let Some(relative) = pathdiff::diff_paths(entry.path(), &container_dir) else {
                continue;
            };
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if !has_extension(&name, &self.extension) {
                continue;
            }
            if let Some(prefix) = prefix {
                if !name.starts_with(prefix) {
                    continue;
                }
            }

            let metadata = entry.metadata().map_err(|e| {
                TandemError::Storage(format!("Failed to stat {}: {}", entry.path().display(), e))
            })?;
            blobs.push(BlobInfo {
                name,
                size: metadata.len(),
                last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }

        blobs.sort_by(|a, b| a.name.cmp(&b.name));
        debug!("Listed {} blobs in {}", blobs.len(), container);
        Ok(blobs)
    }

    async fn read_blob(&self, container: &str, name: &str) -> Result<String> {
        let path = self.blob_path(container, name)?;
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(TandemError::NotFound(format!("blob '{}/{}'", container, name)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_blob(
        &self,
        container: &str,
        name: &str,
        content: &str,
        overwrite: bool,
    ) -> Result<()> {
        let path = self.blob_path(container, name)?;
        if !overwrite && path.exists() {
            return Err(TandemError::AlreadyExists(format!("blob '{}/{}'", container, name)));
        }

        let parent = path
            .parent()
            .ok_or_else(|| TandemError::Storage(format!("No parent directory for {}", name)))?;
        fs::create_dir_all(parent).await?;

        // Write beside the target and rename so readers never see a partial blob
        let temp_path = parent.join(format!("{}{}", TEMP_PREFIX, uuid::Uuid::new_v4()));
        fs::write(&temp_path, content).await?;
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!("Wrote blob {}/{} ({} bytes)", container, name, content.len());
        Ok(())
    }

    async fn ensure_container_exists(&self, container: &str) -> Result<()> {
        let path = self.container_path(container)?;
        if !path.is_dir() {
            fs::create_dir_all(&path).await?;
            info!("Created container: {}", container);
        }
        Ok(())
    }

    async fn container_exists(&self, container: &str) -> Result<bool> {
        Ok(self.container_path(container)?.is_dir())
    }

    async fn blob_exists(&self, container: &str, name: &str) -> Result<bool> {
        Ok(self.blob_path(container, name)?.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, FsObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path(), "txt");
        (dir, store)
    }

    #[tokio::test]
    async fn test_write_then_list_and_read() {
        let (_dir, store) = store();
        store.ensure_container_exists("out").await.unwrap();
        store.write_blob("out", "nmt/a.txt", "hola", true).await.unwrap();
        store.write_blob("out", "llm/a.txt", "hola!", true).await.unwrap();
        store.write_blob("out", "notes.md", "skip", true).await.unwrap();

        let all = store.list_blobs("out", None).await.unwrap();
        let names: Vec<_> = all.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["llm/a.txt", "nmt/a.txt"]);

        let nmt = store.list_blobs("out", Some("nmt/")).await.unwrap();
        assert_eq!(nmt.len(), 1);
        assert_eq!(nmt[0].size, 4);
        assert!(nmt[0].last_modified.is_some());

        assert_eq!(store.read_blob("out", "nmt/a.txt").await.unwrap(), "hola");
    }

    #[tokio::test]
    async fn test_overwrite_is_idempotent() {
        let (_dir, store) = store();
        store.write_blob("out", "a.txt", "first", true).await.unwrap();
        store.write_blob("out", "a.txt", "second", true).await.unwrap();
        store.write_blob("out", "a.txt", "second", true).await.unwrap();

        assert_eq!(store.read_blob("out", "a.txt").await.unwrap(), "second");
        assert_eq!(store.list_blobs("out", None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_no_overwrite_rejects_existing_blob() {
        let (_dir, store) = store();
        store.write_blob("out", "a.txt", "first", true).await.unwrap();
        let result = store.write_blob("out", "a.txt", "second", false).await;
        assert!(matches!(result, Err(TandemError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_missing_blob_and_container() {
        let (_dir, store) = store();
        assert!(matches!(
            store.read_blob("out", "a.txt").await,
            Err(TandemError::NotFound(_))
        ));
        assert!(matches!(
            store.list_blobs("nowhere", None).await,
            Err(TandemError::NotFound(_))
        ));
        assert!(!store.container_exists("nowhere").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_containers() {
        let (_dir, store) = store();
        store.ensure_container_exists("b").await.unwrap();
        store.ensure_container_exists("a").await.unwrap();
        store.ensure_container_exists("a").await.unwrap();
        assert_eq!(store.list_containers().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_path_traversal_is_rejected() {
        let (_dir, store) = store();
        let result = store.write_blob("out", "../escape.txt", "x", true).await;
        assert!(matches!(result, Err(TandemError::Validation(_))));
    }
}
