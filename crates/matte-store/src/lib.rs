//! Job store for the matte pipeline.
//!
//! The [`JobStore`] trait is the only way jobs change state. Two backends:
//! [`MemoryJobStore`] for tests and single-process runs, [`RedisJobStore`]
//! for workers spread across processes.

pub mod error;
pub mod memory;
pub mod redis_store;
pub mod store;

use std::sync::Arc;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryJobStore;
pub use redis_store::RedisJobStore;
pub use store::{ClaimOutcome, JobFilter, JobStore, StoreBackend, StoreConfig};

/// Build the backend named by `config`.
pub async fn connect(config: StoreConfig) -> StoreResult<Arc<dyn JobStore>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryJobStore::new())),
        StoreBackend::Redis => Ok(Arc::new(RedisJobStore::connect(config).await?)),
    }
}
