//! Per-job scratch directories.
//!
//! Layout under the worker's root: `{root}/{job_id}/{source,processed,out}`.
//! A job that was requeued after a crash may find its old directory; it is
//! wiped before the new attempt starts.

use std::path::{Path, PathBuf};
use tracing::debug;

use matte_models::JobId;

use crate::error::WorkerResult;

#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
}

impl WorkDir {
    pub fn path_for(root: &Path, job_id: &JobId) -> PathBuf {
        root.join(job_id.as_str())
    }

    /// Create a fresh directory for `job_id`, removing leftovers of earlier attempts.
    pub async fn prepare(root: &Path, job_id: &JobId) -> WorkerResult<Self> {
        let path = Self::path_for(root, job_id);
        if remove_stale(root, job_id).await? {
            debug!(job_id = %job_id, "Removed partial output of an earlier attempt");
        }
        let dir = Self { path };
        for sub in [dir.source_frames(), dir.processed_frames(), dir.output_dir()] {
            tokio::fs::create_dir_all(sub).await?;
        }
        Ok(dir)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decoded source frames.
    pub fn source_frames(&self) -> PathBuf {
        self.path.join("source")
    }

    /// Keyed and composited frames.
    pub fn processed_frames(&self) -> PathBuf {
        self.path.join("processed")
    }

    /// Encoded video and variants before upload.
    pub fn output_dir(&self) -> PathBuf {
        self.path.join("out")
    }

    pub async fn cleanup(self) -> std::io::Result<()> {
        match tokio::fs::remove_dir_all(&self.path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Delete the directory of `job_id` if it exists.
pub async fn remove_stale(root: &Path, job_id: &JobId) -> std::io::Result<bool> {
    let path = WorkDir::path_for(root, job_id);
    match tokio::fs::remove_dir_all(&path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
