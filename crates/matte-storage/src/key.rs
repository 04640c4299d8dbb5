//! Object key layout for job results.

use matte_models::{JobId, ResultVariant};

use crate::error::{StorageError, StorageResult};

/// Prefix shared by every object of one job.
pub fn job_prefix(job_id: &JobId) -> String {
    format!("results/{}/", job_id)
}

/// `results/{job_id}/{variant}.{extension}`
pub fn result_key(job_id: &JobId, variant: ResultVariant, extension: &str) -> String {
    format!("{}{}.{}", job_prefix(job_id), variant.as_str(), extension)
}

/// Reject keys that could escape a local root or confuse an object store.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|part| part == ".." || part == ".")
    {
        return Err(StorageError::invalid_key(key));
    }
    Ok(())
}
