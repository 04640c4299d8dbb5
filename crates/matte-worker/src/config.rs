//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use matte_media::DEFAULT_RECLAIM_EVERY;
use matte_models::DEFAULT_PALETTE_COLORS;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(env_or(key, default))
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Identifier written into `claimed_by`
    pub worker_id: String,
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Wall-clock bound on one job, from claim to result
    pub job_timeout: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Root of the per-job work directories
    pub work_dir: PathBuf,
    /// Sleep between empty polls of the job store
    pub poll_interval: Duration,
    /// Interval for refreshing `updated_at` while a job runs
    pub heartbeat_interval: Duration,
    /// How often the sweeper looks for stuck jobs
    pub sweep_interval: Duration,
    /// In-flight jobs idle for longer than this are requeued
    pub stale_threshold: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", uuid::Uuid::new_v4()),
            max_concurrent_jobs: 2,
            job_timeout: Duration::from_secs(3600), // 1 hour
            shutdown_timeout: Duration::from_secs(30),
            work_dir: PathBuf::from("/tmp/matte"),
            poll_interval: Duration::from_millis(500),
            heartbeat_interval: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(60),
            stale_threshold: Duration::from_secs(300), // 5 minutes
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            worker_id: std::env::var("WORKER_ID").unwrap_or(defaults.worker_id),
            max_concurrent_jobs: env_or("WORKER_MAX_JOBS", defaults.max_concurrent_jobs).max(1),
            job_timeout: env_secs("WORKER_JOB_TIMEOUT", 3600),
            shutdown_timeout: env_secs("WORKER_SHUTDOWN_TIMEOUT", 30),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            poll_interval: Duration::from_millis(env_or("WORKER_POLL_INTERVAL_MS", 500)),
            heartbeat_interval: env_secs("WORKER_JOB_HEARTBEAT_SECS", 30),
            sweep_interval: env_secs("WORKER_SWEEP_INTERVAL_SECS", 60),
            stale_threshold: env_secs("WORKER_STALE_THRESHOLD_SECS", 300),
        }
    }
}

/// Settings for the keying pipeline itself.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Hard limit on each ffmpeg invocation
    pub ffmpeg_timeout: Duration,
    /// Hard limit on each ffprobe invocation
    pub probe_timeout: Duration,
    /// Frames between scratch-buffer releases
    pub reclaim_every: usize,
    /// Colours kept in the palette animation
    pub palette_colors: u16,
    /// Attempts beyond the first when storing a result
    pub upload_retries: u32,
    /// Base for relative source and texture paths
    pub input_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_timeout: Duration::from_secs(600),
            probe_timeout: Duration::from_secs(30),
            reclaim_every: DEFAULT_RECLAIM_EVERY,
            palette_colors: DEFAULT_PALETTE_COLORS,
            upload_retries: 3,
            input_dir: None,
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            ffmpeg_timeout: env_secs("FFMPEG_TIMEOUT_SECS", 600),
            probe_timeout: env_secs("FFPROBE_TIMEOUT_SECS", 30),
            reclaim_every: env_or("FRAME_RECLAIM_EVERY", DEFAULT_RECLAIM_EVERY).max(1),
            palette_colors: env_or("PALETTE_COLORS", DEFAULT_PALETTE_COLORS).clamp(2, 256),
            upload_retries: env_or("RESULT_UPLOAD_RETRIES", 3),
            input_dir: std::env::var("MEDIA_INPUT_DIR").ok().map(PathBuf::from),
        }
    }

    /// Resolve a path from a payload against `input_dir`.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let path = PathBuf::from(path);
        match &self.input_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.max_concurrent_jobs, 2);
        assert!(config.worker_id.starts_with("worker-"));

        let pipeline = PipelineConfig::default();
        assert_eq!(pipeline.reclaim_every, 32);
        assert_eq!(pipeline.palette_colors, 128);
    }

    #[test]
    fn test_resolve() {
        let config = PipelineConfig {
            input_dir: Some(PathBuf::from("/media")),
            ..Default::default()
        };
        assert_eq!(config.resolve("clip.mp4"), PathBuf::from("/media/clip.mp4"));
        assert_eq!(config.resolve("/abs/clip.mp4"), PathBuf::from("/abs/clip.mp4"));
        assert_eq!(PipelineConfig::default().resolve("clip.mp4"), PathBuf::from("clip.mp4"));
    }
}
