//! Frames and on-disk frame sequences.
//!
//! A sequence is a directory of `frame_000000.png`, `frame_000001.png`, ...
//! with contiguous zero-based ordinals.

use image::RgbaImage;
use std::path::{Path, PathBuf};

use matte_models::JobId;

use crate::error::{MediaError, MediaResult};

/// FFmpeg pattern matching [`frame_file_name`].
pub const FRAME_PATTERN: &str = "frame_%06d.png";

pub fn frame_file_name(index: usize) -> String {
    format!("frame_{index:06}.png")
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub index: usize,
    pub image: RgbaImage,
    pub job_id: JobId,
}

impl Frame {
    pub fn new(index: usize, image: RgbaImage, job_id: JobId) -> Self {
        Self { index, image, job_id }
    }
}

/// A contiguous PNG sequence on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSequence {
    dir: PathBuf,
    count: usize,
    fps: f64,
    width: u32,
    height: u32,
}

impl FrameSequence {
    pub fn new(dir: impl Into<PathBuf>, count: usize, fps: f64, width: u32, height: u32) -> Self {
        Self {
            dir: dir.into(),
            count,
            fps,
            width,
            height,
        }
    }

    /// Scan a directory, requiring ordinals `0..n` with no gaps.
    pub fn scan(dir: impl Into<PathBuf>, fps: f64) -> MediaResult<Self> {
        let dir = dir.into();
        let mut indices = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            if let Some(index) = parse_frame_file_name(&name) {
                indices.push(index);
            }
        }
        indices.sort_unstable();

        if let Some((expected, found)) = indices.iter().enumerate().find(|(i, idx)| *i != **idx) {
            return Err(MediaError::InvalidSequence(format!(
                "gap in {}: expected frame {expected}, found {found}",
                dir.display()
            )));
        }

        let (width, height) = match indices.first() {
            Some(_) => image::image_dimensions(dir.join(frame_file_name(0)))?,
            None => (0, 0),
        };

        Ok(Self::new(dir, indices.len(), fps, width, height))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Playback duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.fps > 0.0 {
            self.count as f64 / self.fps
        } else {
            0.0
        }
    }

    pub fn frame_path(&self, index: usize) -> PathBuf {
        self.dir.join(frame_file_name(index))
    }

    /// FFmpeg input pattern for the sequence.
    pub fn pattern(&self) -> PathBuf {
        self.dir.join(FRAME_PATTERN)
    }

    pub fn load(&self, index: usize, job_id: &JobId) -> MediaResult<Frame> {
        if index >= self.count {
            return Err(MediaError::InvalidSequence(format!(
                "frame {index} out of range ({} frames)",
                self.count
            )));
        }
        let image = image::open(self.frame_path(index))?.into_rgba8();
        Ok(Frame::new(index, image, job_id.clone()))
    }

    pub(crate) fn with_count_and_fps(mut self, count: usize, fps: f64) -> Self {
        self.count = count;
        self.fps = fps;
        self
    }
}

/// Write a frame as PNG into `dir` under its ordinal.
pub fn save_frame(dir: &Path, frame: &Frame) -> MediaResult<PathBuf> {
    let path = dir.join(frame_file_name(frame.index));
    frame.image.save_with_format(&path, image::ImageFormat::Png)?;
    Ok(path)
}

fn parse_frame_file_name(name: &str) -> Option<usize> {
    name.strip_prefix("frame_")?.strip_suffix(".png")?.parse().ok()
}

/// The processed sequence that feeds the encoder.
///
/// Not `Clone`: [`crate::encode::AlphaEncoder::encode`] takes it by value, so a
/// sequence is encoded exactly once and an encoded file can never be fed back
/// in as a source.
#[derive(Debug)]
pub struct FinalFrameSequence {
    inner: FrameSequence,
}

impl FinalFrameSequence {
    pub fn new(sequence: FrameSequence) -> MediaResult<Self> {
        if sequence.is_empty() {
            return Err(MediaError::InvalidSequence("no frames to encode".to_string()));
        }
        if sequence.fps() <= 0.0 || !sequence.fps().is_finite() {
            return Err(MediaError::InvalidSequence(format!("invalid frame rate {}", sequence.fps())));
        }
        Ok(Self { inner: sequence })
    }

    pub fn sequence(&self) -> &FrameSequence {
        &self.inner
    }
}
