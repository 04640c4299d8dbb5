//! Single-pass alpha-preserving encode of a processed frame sequence.

use std::path::{Path, PathBuf};
use tracing::info;

use matte_models::EncodingConfig;

use crate::command::{FfmpegCommand, FfmpegProgress, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::frame::FinalFrameSequence;

/// Output of a finished encode.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedVideo {
    pub path: PathBuf,
    pub frame_count: usize,
    pub fps: f64,
    pub content_type: &'static str,
}

impl EncodedVideo {
    pub fn duration(&self) -> f64 {
        self.frame_count as f64 / self.fps
    }
}

/// Encodes PNG sequences into one alpha-capable container.
#[derive(Debug, Clone)]
pub struct AlphaEncoder {
    runner: FfmpegRunner,
    config: EncodingConfig,
}

impl AlphaEncoder {
    pub fn new(runner: FfmpegRunner, config: EncodingConfig) -> Self {
        Self { runner, config }
    }

    pub fn config(&self) -> &EncodingConfig {
        &self.config
    }

    /// Build the ffmpeg invocation for a sequence.
    pub fn command(&self, sequence: &FinalFrameSequence, output: &Path) -> FfmpegCommand {
        let frames = sequence.sequence();
        FfmpegCommand::new(frames.pattern(), output)
            .image_sequence_input(frames.fps())
            .output_args(self.config.to_ffmpeg_args())
    }

    /// Encode `sequence` into `output_dir/<stem>.<ext>`, reporting ffmpeg's
    /// progress to `on_progress`.
    ///
    /// Takes the sequence by value: each processed sequence is encoded once.
    pub async fn encode<F>(
        &self,
        sequence: FinalFrameSequence,
        output_dir: &Path,
        stem: &str,
        on_progress: F,
    ) -> MediaResult<EncodedVideo>
    where
        F: Fn(FfmpegProgress) + Send + 'static,
    {
        let output = output_dir.join(format!("{stem}.{}", self.config.codec.extension()));
        let cmd = self.command(&sequence, &output);
        let frames = sequence.sequence();

        info!(
            frames = frames.len(),
            fps = frames.fps(),
            codec = self.config.codec.encoder(),
            "Encoding transparent video"
        );
        self.runner.run_with_progress(&cmd, on_progress).await?;

        if !output.exists() {
            return Err(MediaError::ffmpeg_failed(
                format!("encoder produced no file at {}", output.display()),
                None,
                None,
            ));
        }

        Ok(EncodedVideo {
            path: output,
            frame_count: frames.len(),
            fps: frames.fps(),
            content_type: self.config.codec.content_type(),
        })
    }
}
