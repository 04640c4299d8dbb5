//! The keying job: extract, key, composite, reduce, encode, store.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use matte_media::{
    build_palette_animation, build_still_archive, posterize_sequence, AlphaEncoder, EffectsPipeline,
    FfmpegProgress, FfmpegRunner, FinalFrameSequence, FrameExtractor, FrameProcessor, KeyingEngine,
    StageTextures, Texture, VideoSource,
};
use matte_models::{EncodingConfig, JobId, JobType, KeyingPayload, ResultRef, ResultVariant, TextureWrap};
use matte_storage::{result_key, ResultStore, StorageError};

use crate::config::PipelineConfig;
use crate::error::WorkerResult;
use crate::handler::{join_error, JobContext, JobHandler};
use crate::logging::JobLogger;
use crate::metrics::record_upload;
use crate::retry::{retry_async_when, RetryConfig};

/// A file produced by the job, waiting to be stored.
#[derive(Debug)]
pub(crate) struct Artifact {
    pub variant: ResultVariant,
    pub path: PathBuf,
    pub extension: &'static str,
    pub content_type: &'static str,
}

/// Stores artifacts under the job's key prefix, retrying transient failures.
#[derive(Clone)]
pub(crate) struct ResultUploader {
    storage: Arc<dyn ResultStore>,
    retries: u32,
}

impl ResultUploader {
    pub fn new(storage: Arc<dyn ResultStore>, retries: u32) -> Self {
        Self { storage, retries }
    }

    pub fn backend(&self) -> &'static str {
        self.storage.name()
    }

    pub async fn store(&self, job_id: &JobId, artifact: &Artifact) -> WorkerResult<ResultRef> {
        let key = result_key(job_id, artifact.variant, artifact.extension);
        let retry = RetryConfig::new(format!("store_{}", artifact.variant)).with_max_retries(self.retries);

        let stored = retry_async_when(&retry, StorageError::is_retryable, || {
            self.storage.put_file(&artifact.path, &key, artifact.content_type)
        })
        .await
        .into_result();
        record_upload(artifact.variant.as_str(), stored.is_ok());

        Ok(ResultRef::new(artifact.variant, stored?))
    }
}

/// Forward ffmpeg progress for `stage` to the job log.
pub(crate) fn log_ffmpeg_progress(
    logger: &JobLogger,
    stage: &'static str,
    total_frames: Option<usize>,
) -> impl Fn(FfmpegProgress) + Clone + Send + 'static {
    let logger = logger.clone();
    move |progress: FfmpegProgress| {
        let frames = match total_frames {
            Some(total) => format!("frame {}/{}", progress.frame, total),
            None => format!("frame {}", progress.frame),
        };
        logger.log_progress(
            stage,
            &format!(
                "{}, {:.1}s written at {:.2}x{}",
                frames,
                progress.out_time_ms as f64 / 1000.0,
                progress.speed,
                if progress.is_complete { ", done" } else { "" }
            ),
        );
    }
}

/// Handler for [`JobType::Keying`].
pub struct KeyingHandler {
    config: PipelineConfig,
    runner: FfmpegRunner,
    uploader: ResultUploader,
}

impl KeyingHandler {
    pub fn new(config: PipelineConfig, storage: Arc<dyn ResultStore>) -> Self {
        let runner = FfmpegRunner::new().with_timeout(config.ffmpeg_timeout);
        let uploader = ResultUploader::new(storage, config.upload_retries);
        Self {
            config,
            runner,
            uploader,
        }
    }

    /// Override the ffmpeg runner (tests use short timeouts or stub programs).
    pub fn with_runner(mut self, runner: FfmpegRunner) -> Self {
        self.runner = runner;
        self
    }

    async fn load_texture(
        &self,
        name: &str,
        enabled: bool,
        source: &Option<String>,
        size: (u32, u32),
        wrap: TextureWrap,
    ) -> WorkerResult<Option<Texture>> {
        match source {
            Some(path) if enabled => {
                let path = self.config.resolve(path);
                let texture = Texture::load(name, &path, size.0, size.1, wrap, &self.runner).await?;
                Ok(Some(texture))
            }
            _ => Ok(None),
        }
    }

    async fn load_textures(&self, payload: &KeyingPayload, size: (u32, u32)) -> WorkerResult<StageTextures> {
        let effects = &payload.effects;
        let wrap = effects.texture_wrap;
        Ok(StageTextures {
            displacement: self
                .load_texture("displacement", effects.displacement.enabled, &payload.textures.displacement, size, wrap)
                .await?,
            multiply: self
                .load_texture("multiply", effects.multiply.enabled, &payload.textures.multiply, size, wrap)
                .await?,
            add: self
                .load_texture("add", effects.add.enabled, &payload.textures.add, size, wrap)
                .await?,
        })
    }

}

#[async_trait]
impl JobHandler for KeyingHandler {
    fn job_type(&self) -> JobType {
        JobType::Keying
    }

    async fn handle(&self, ctx: &JobContext) -> WorkerResult<Vec<ResultRef>> {
        let logger = &ctx.logger;
        let job_id = ctx.job.id.clone();
        let payload = ctx.job.keying_payload()?;
        let work = &ctx.work_dir;

        // Decode
        let started = Instant::now();
        let extractor = FrameExtractor::new(self.runner.clone(), self.config.probe_timeout);
        let source = VideoSource::Path(self.config.resolve(&payload.source));
        let (frames, info) = extractor
            .extract(source, work.path(), &work.source_frames())
            .await?;
        logger.log_stage(
            "extract",
            &format!(
                "{} frames {}x{} at {:.3} fps in {:.1}s",
                frames.len(),
                frames.width(),
                frames.height(),
                info.fps,
                started.elapsed().as_secs_f64()
            ),
        );

        // Key and composite, one frame at a time on a blocking thread
        let started = Instant::now();
        let textures = self
            .load_textures(&payload, (frames.width(), frames.height()))
            .await?;
        let effects = EffectsPipeline::from_config(&payload.effects, textures)?;
        let stages = effects.stage_names();
        let processor = FrameProcessor::new(KeyingEngine::new(&payload.keying), effects, self.config.reclaim_every);

        let processed_dir = work.processed_frames();
        let source_dir = work.source_frames();
        let frame_job = job_id.clone();
        let (processed, stats) = tokio::task::spawn_blocking(move || {
            processor.process_sequence(&frames, &processed_dir, &frame_job, |done| {
                if done % 100 == 0 {
                    debug!(job_id = %frame_job, frames = done, "Processed frames");
                }
            })
        })
        .await
        .map_err(join_error)??;
        tokio::fs::remove_dir_all(&source_dir).await?;
        logger.log_stage(
            "process",
            &format!(
                "{} frames through {:?}, {} buffer releases, {:.1}s",
                stats.frames,
                stages,
                stats.reclaims,
                started.elapsed().as_secs_f64()
            ),
        );

        let processed = if payload.effects.posterize.enabled {
            let target = f64::from(payload.effects.posterize.target_fps);
            let reduced = posterize_sequence(processed, target).await?;
            logger.log_stage("posterize", &format!("{} frames at {:.3} fps", reduced.len(), reduced.fps()));
            reduced
        } else {
            processed
        };
        let sequence = FinalFrameSequence::new(processed)?;
        let out_dir = work.output_dir();

        // Variants read the raw frames, so they are built before the encode consumes them
        let mut artifacts = Vec::new();
        let sequence = if payload.outputs.still_archive {
            let archive = out_dir.join("stills.zip");
            let target = archive.clone();
            let (sequence, built) = tokio::task::spawn_blocking(move || {
                let built = build_still_archive(&sequence, &target);
                (sequence, built)
            })
            .await
            .map_err(join_error)?;
            built?;
            artifacts.push(Artifact {
                variant: ResultVariant::StillArchive,
                path: archive,
                extension: "zip",
                content_type: "application/zip",
            });
            sequence
        } else {
            sequence
        };

        if payload.outputs.palette_animation {
            let gif = out_dir.join("animation.gif");
            build_palette_animation(&self.runner, &sequence, &gif, self.config.palette_colors).await?;
            artifacts.push(Artifact {
                variant: ResultVariant::PaletteAnimation,
                path: gif,
                extension: "gif",
                content_type: "image/gif",
            });
        }

        let started = Instant::now();
        let encoding = EncodingConfig::new(payload.outputs.codec);
        let extension = encoding.codec.extension();
        let total_frames = sequence.sequence().len();
        let video = AlphaEncoder::new(self.runner.clone(), encoding)
            .encode(
                sequence,
                &out_dir,
                "transparent",
                log_ffmpeg_progress(logger, "encode", Some(total_frames)),
            )
            .await?;
        logger.log_stage(
            "encode",
            &format!(
                "{} frames, {:.2}s of video in {:.1}s",
                video.frame_count,
                video.duration(),
                started.elapsed().as_secs_f64()
            ),
        );
        artifacts.insert(
            0,
            Artifact {
                variant: ResultVariant::TransparentVideo,
                path: video.path.clone(),
                extension,
                content_type: video.content_type,
            },
        );

        let mut results = Vec::with_capacity(artifacts.len());
        for artifact in &artifacts {
            results.push(self.uploader.store(&job_id, artifact).await?);
        }
        logger.log_stage("store", &format!("{} results via {}", results.len(), self.uploader.backend()));
        Ok(results)
    }
}

/// Whether ffmpeg and ffprobe are on `PATH`.
pub fn check_media_tools() -> WorkerResult<(PathBuf, PathBuf)> {
    Ok((matte_media::check_ffmpeg()?, matte_media::check_ffprobe()?))
}
