//! Result storage for finished jobs.
//!
//! This crate provides:
//! - The [`ResultStore`] trait and backend selection from configuration
//! - A local-directory store
//! - A Cloudflare R2 (S3-compatible) store
//! - Object key layout for result variants

pub mod client;
pub mod error;
pub mod key;
pub mod local;
pub mod store;

pub use client::{R2Config, R2ResultStore};
pub use error::{StorageError, StorageResult};
pub use key::{job_prefix, result_key, validate_key};
pub use local::LocalResultStore;
pub use store::{open, ResultStore, StorageConfig};
