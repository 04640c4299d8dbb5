//! Matte job worker.
//!
//! This crate provides:
//! - Job executor with bounded concurrency, heartbeats and graceful shutdown
//! - The keying handler that drives the frame pipeline and stores results
//! - The stitching handler and parent jobs that finish with their children
//! - Stale job sweeping and per-job work directories
//! - Retry and discard that keep stored results in step with the job table

pub mod admin;
pub mod aggregate;
pub mod config;
pub mod error;
pub mod executor;
pub mod handler;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod retry;
pub mod stitching;
pub mod sweeper;
pub mod workdir;

pub use admin::JobAdmin;
pub use aggregate::{ParentAggregator, ParentProgress};
pub use config::{PipelineConfig, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use executor::{JobExecutor, JobOutcome};
pub use handler::{HandlerRegistry, JobContext, JobHandler};
pub use logging::JobLogger;
pub use pipeline::{check_media_tools, KeyingHandler};
pub use stitching::StitchHandler;
pub use sweeper::StaleJobSweeper;
pub use workdir::WorkDir;
