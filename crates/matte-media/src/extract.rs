//! Source decode into a lossless RGBA PNG sequence.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::frame::{FrameSequence, FRAME_PATTERN};
use crate::probe::{probe_video, VideoInfo};

/// Where the source video comes from.
#[derive(Debug, Clone)]
pub enum VideoSource {
    Path(PathBuf),
    /// Raw container bytes; spilled to a file in the work directory first.
    Bytes(Vec<u8>),
}

impl From<PathBuf> for VideoSource {
    fn from(path: PathBuf) -> Self {
        VideoSource::Path(path)
    }
}

impl From<&Path> for VideoSource {
    fn from(path: &Path) -> Self {
        VideoSource::Path(path.to_path_buf())
    }
}

/// Decodes sources with ffprobe and ffmpeg.
#[derive(Debug, Clone)]
pub struct FrameExtractor {
    runner: FfmpegRunner,
    probe_timeout: Duration,
}

impl FrameExtractor {
    pub fn new(runner: FfmpegRunner, probe_timeout: Duration) -> Self {
        Self { runner, probe_timeout }
    }

    /// Decode every frame at native resolution and rate into `frames_dir`.
    ///
    /// Any failure to read the source, other than a timeout, is a
    /// [`MediaError::Decode`].
    pub async fn extract(
        &self,
        source: VideoSource,
        work_dir: &Path,
        frames_dir: &Path,
    ) -> MediaResult<(FrameSequence, VideoInfo)> {
        let path = match source {
            VideoSource::Path(path) => path,
            VideoSource::Bytes(bytes) => {
                if bytes.is_empty() {
                    return Err(MediaError::decode("source is empty"));
                }
                let spilled = work_dir.join("source.bin");
                tokio::fs::write(&spilled, &bytes).await?;
                spilled
            }
        };

        let info = match probe_video(&path, self.probe_timeout).await {
            Err(MediaError::FileNotFound(p)) => {
                return Err(MediaError::decode(format!("source not found: {}", p.display())))
            }
            other => other?,
        };

        tokio::fs::create_dir_all(frames_dir).await?;
        let cmd = FfmpegCommand::new(&path, frames_dir.join(FRAME_PATTERN))
            .output_args(["-map", "0:v:0", "-fps_mode", "passthrough", "-start_number", "0"])
            .pixel_format("rgba")
            .output_arg("-an");

        self.runner.run(&cmd).await.map_err(|e| match e {
            e @ (MediaError::Timeout { .. } | MediaError::FfmpegNotFound | MediaError::Io(_)) => e,
            other => MediaError::decode(format!("ffmpeg could not decode {}: {other}", path.display())),
        })?;

        let sequence = FrameSequence::scan(frames_dir, info.fps)?;
        if sequence.is_empty() {
            return Err(MediaError::decode(format!("{} decoded to zero frames", path.display())));
        }

        info!(
            frames = sequence.len(),
            fps = info.fps,
            width = sequence.width(),
            height = sequence.height(),
            "Extracted source frames"
        );
        Ok((sequence, info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_empty_bytes_is_decode_error() {
        let dir = TempDir::new().unwrap();
        let extractor = FrameExtractor::new(FfmpegRunner::new(), Duration::from_secs(5));
        let err = extractor
            .extract(VideoSource::Bytes(Vec::new()), dir.path(), &dir.path().join("frames"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Decode(_)));
    }

    #[tokio::test]
    async fn test_missing_file_is_decode_error() {
        let dir = TempDir::new().unwrap();
        let extractor = FrameExtractor::new(FfmpegRunner::new(), Duration::from_secs(5));
        let err = extractor
            .extract(dir.path().join("missing.mp4").into(), dir.path(), &dir.path().join("frames"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Decode(_)));
    }

    #[tokio::test]
    #[ignore = "requires ffmpeg"]
    async fn test_garbage_bytes_is_decode_error() {
        let dir = TempDir::new().unwrap();
        let extractor = FrameExtractor::new(FfmpegRunner::new(), Duration::from_secs(10));
        let err = extractor
            .extract(VideoSource::Bytes(b"not a video".to_vec()), dir.path(), &dir.path().join("frames"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Decode(_)));
    }
}
