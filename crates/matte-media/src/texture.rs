//! Animated textures for the displacement and blend stages.
//!
//! A texture is loaded once per job, resized to the frame size, and then only
//! read. Frame ordinals past its end wrap or clamp per [`TextureWrap`].

use image::imageops::FilterType;
use image::RgbaImage;
use std::path::Path;
use tempfile::TempDir;
use tracing::debug;

use matte_models::TextureWrap;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::frame::{FrameSequence, FRAME_PATTERN};

#[derive(Debug, Clone)]
pub struct Texture {
    name: String,
    frames: Vec<RgbaImage>,
    wrap: TextureWrap,
}

impl Texture {
    /// Build from decoded frames. At least one frame is required.
    pub fn from_frames(name: impl Into<String>, frames: Vec<RgbaImage>, wrap: TextureWrap) -> MediaResult<Self> {
        let name = name.into();
        if frames.is_empty() {
            return Err(MediaError::stage(name, "texture has no frames"));
        }
        Ok(Self { name, frames, wrap })
    }

    /// Load a still PNG or a video file, scaled to `width`×`height`.
    pub async fn load(
        name: &str,
        path: &Path,
        width: u32,
        height: u32,
        wrap: TextureWrap,
        runner: &FfmpegRunner,
    ) -> MediaResult<Self> {
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }

        let is_still = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("png"));

        let frames = if is_still {
            let image = image::open(path)?.into_rgba8();
            vec![fit(image, width, height)]
        } else {
            let scratch = TempDir::new()?;
            let cmd = FfmpegCommand::new(path, scratch.path().join(FRAME_PATTERN))
                .output_args(["-start_number", "0", "-fps_mode", "passthrough"])
                .video_filter(format!("scale={width}:{height}:flags=bilinear"))
                .pixel_format("rgba");
            runner
                .run(&cmd)
                .await
                .map_err(|e| if e.is_timeout() { e } else { MediaError::stage(name, format!("texture decode failed: {e}")) })?;

            let sequence = FrameSequence::scan(scratch.path(), 0.0)?;
            (0..sequence.len())
                .map(|i| Ok(fit(image::open(sequence.frame_path(i))?.into_rgba8(), width, height)))
                .collect::<MediaResult<Vec<_>>>()?
        };

        debug!(texture = name, frames = frames.len(), "Loaded texture");
        Self::from_frames(name, frames, wrap)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Texture frame for a video frame ordinal.
    pub fn frame(&self, frame_index: usize) -> &RgbaImage {
        &self.frames[self.wrap.index(frame_index, self.frames.len())]
    }
}

fn fit(image: RgbaImage, width: u32, height: u32) -> RgbaImage {
    if image.width() == width && image.height() == height {
        image
    } else {
        image::imageops::resize(&image, width, height, FilterType::Triangle)
    }
}
