//! Result storage contract and backend selection.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::client::{R2Config, R2ResultStore};
use crate::error::{StorageError, StorageResult};
use crate::local::LocalResultStore;

/// Where finished outputs go.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Store a local file under `key`, returning its location.
    async fn put_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<String>;

    /// Remove everything under `prefix`, returning how many objects went.
    async fn delete_prefix(&self, prefix: &str) -> StorageResult<u32>;
}

/// Which backend to build.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    Local { root: PathBuf },
    R2(R2Config),
}

impl StorageConfig {
    /// `STORAGE_BACKEND=local` (default, rooted at `RESULTS_DIR`) or `r2`.
    pub fn from_env() -> StorageResult<Self> {
        match std::env::var("STORAGE_BACKEND").as_deref() {
            Ok("r2") => Ok(StorageConfig::R2(R2Config::from_env()?)),
            Ok("local") | Err(_) => Ok(StorageConfig::Local {
                root: std::env::var("RESULTS_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("./results")),
            }),
            Ok(other) => Err(StorageError::config_error(format!("unknown STORAGE_BACKEND: {other}"))),
        }
    }
}

/// Build the configured backend.
pub async fn open(config: StorageConfig) -> StorageResult<Arc<dyn ResultStore>> {
    match config {
        StorageConfig::Local { root } => Ok(Arc::new(LocalResultStore::new(root).await?)),
        StorageConfig::R2(config) => {
            let store = R2ResultStore::new(config).await?;
            store.check_connectivity().await?;
            Ok(Arc::new(store))
        }
    }
}
