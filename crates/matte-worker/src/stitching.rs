//! The stitching job: join clips end to end and store the result.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

use matte_media::{FfmpegRunner, Stitcher};
use matte_models::{JobType, ResultRef, ResultVariant};
use matte_storage::ResultStore;

use crate::config::PipelineConfig;
use crate::error::WorkerResult;
use crate::handler::{JobContext, JobHandler};
use crate::pipeline::{log_ffmpeg_progress, Artifact, ResultUploader};

/// Handler for [`JobType::VideoStitching`].
pub struct StitchHandler {
    config: PipelineConfig,
    runner: FfmpegRunner,
    uploader: ResultUploader,
}

impl StitchHandler {
    pub fn new(config: PipelineConfig, storage: Arc<dyn ResultStore>) -> Self {
        let runner = FfmpegRunner::new().with_timeout(config.ffmpeg_timeout);
        let uploader = ResultUploader::new(storage, config.upload_retries);
        Self {
            config,
            runner,
            uploader,
        }
    }

    pub fn with_runner(mut self, runner: FfmpegRunner) -> Self {
        self.runner = runner;
        self
    }

    /// Local sources resolve against the input directory; URLs pass through.
    fn resolve(&self, source: &str) -> String {
        if source.contains("://") {
            source.to_string()
        } else {
            self.config.resolve(source).to_string_lossy().to_string()
        }
    }
}

#[async_trait]
impl JobHandler for StitchHandler {
    fn job_type(&self) -> JobType {
        JobType::VideoStitching
    }

    async fn handle(&self, ctx: &JobContext) -> WorkerResult<Vec<ResultRef>> {
        let logger = &ctx.logger;
        let payload = ctx.job.stitch_payload()?;
        let sources: Vec<String> = payload.sources.iter().map(|s| self.resolve(s)).collect();

        let started = Instant::now();
        let output = ctx.work_dir.output_dir().join("stitched.mp4");
        let stitched = Stitcher::new(self.runner.clone(), self.config.probe_timeout)
            .stitch(&sources, &output, log_ffmpeg_progress(logger, "stitch", None))
            .await?;
        logger.log_stage(
            "stitch",
            &format!(
                "{} clips by {} in {:.1}s",
                sources.len(),
                stitched.method.as_str(),
                started.elapsed().as_secs_f64()
            ),
        );

        let artifact = Artifact {
            variant: ResultVariant::StitchedVideo,
            path: stitched.path,
            extension: "mp4",
            content_type: stitched.content_type,
        };
        let result = self.uploader.store(&ctx.job.id, &artifact).await?;
        logger.log_stage("store", &format!("1 result via {}", self.uploader.backend()));
        Ok(vec![result])
    }
}
