//! Results kept in a local directory.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::key::validate_key;
use crate::store::ResultStore;

/// Copies results under a root directory. Locations are absolute paths.
#[derive(Debug, Clone)]
pub struct LocalResultStore {
    root: PathBuf,
}

impl LocalResultStore {
    pub async fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        let root = tokio::fs::canonicalize(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ResultStore for LocalResultStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn put_file(&self, path: &Path, key: &str, _content_type: &str) -> StorageResult<String> {
        let target = self.path_for(key)?;
        debug!("Copying {} to {}", path.display(), target.display());

        if !tokio::fs::try_exists(path).await? {
            return Err(StorageError::not_found(path.display().to_string()));
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write beside the target and rename so readers never see a partial file.
        let partial = target.with_extension("partial");
        tokio::fs::copy(path, &partial).await?;
        tokio::fs::rename(&partial, &target).await?;

        info!("Stored {} at {}", key, target.display());
        Ok(target.display().to_string())
    }

    async fn delete_prefix(&self, prefix: &str) -> StorageResult<u32> {
        let dir = self.path_for(prefix.trim_end_matches('/'))?;
        if !tokio::fs::try_exists(&dir).await? {
            return Ok(0);
        }

        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                removed += 1;
            }
        }
        tokio::fs::remove_dir_all(&dir)
            .await
            .map_err(|e| StorageError::delete_failed(e.to_string()))?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{job_prefix, result_key};
    use matte_models::{JobId, ResultVariant};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_and_delete() {
        let root = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let store = LocalResultStore::new(root.path()).await.unwrap();

        let source = scratch.path().join("out.webm");
        tokio::fs::write(&source, b"webm").await.unwrap();

        let job = JobId::new();
        let key = result_key(&job, ResultVariant::TransparentVideo, "webm");
        let location = store.put_file(&source, &key, "video/webm").await.unwrap();

        assert_eq!(tokio::fs::read(&location).await.unwrap(), b"webm");
        assert!(Path::new(&location).starts_with(store.root()));

        assert_eq!(store.delete_prefix(&job_prefix(&job)).await.unwrap(), 1);
        assert!(!Path::new(&location).exists());
        assert_eq!(store.delete_prefix(&job_prefix(&job)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_source() {
        let root = TempDir::new().unwrap();
        let store = LocalResultStore::new(root.path()).await.unwrap();
        let err = store
            .put_file(&root.path().join("nope.webm"), "results/x/a.webm", "video/webm")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_rejects_escaping_key() {
        let root = TempDir::new().unwrap();
        let store = LocalResultStore::new(root.path()).await.unwrap();
        let err = store.delete_prefix("../outside/").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }
}
