//! Frame pipeline for chroma-keyed video.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with hard subprocess timeouts
//! - Source probing and lossless PNG frame extraction
//! - Chroma keying and the compositing effects chain
//! - Frame-rate reduction, alpha-preserving encode and extra result variants
//! - Joining clips end to end

pub mod command;
pub mod effects;
pub mod encode;
pub mod error;
pub mod extract;
pub mod frame;
pub mod keying;
pub mod posterize;
pub mod probe;
pub mod process;
pub mod raster;
pub mod stitch;
pub mod texture;
pub mod variants;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegProgress, FfmpegRunner};
pub use effects::{EffectStage, EffectsPipeline, FrameEffect, StageTextures};
pub use encode::{AlphaEncoder, EncodedVideo};
pub use error::{MediaError, MediaResult};
pub use extract::{FrameExtractor, VideoSource};
pub use frame::{FinalFrameSequence, Frame, FrameSequence};
pub use keying::KeyingEngine;
pub use posterize::{posterize_frames, posterize_sequence, reduction_interval};
pub use probe::{probe_video, VideoInfo};
pub use process::{FrameProcessor, ProcessStats, DEFAULT_RECLAIM_EVERY};
pub use raster::FramePlanes;
pub use stitch::{StitchMethod, StitchedVideo, Stitcher};
pub use texture::Texture;
pub use variants::{build_palette_animation, build_still_archive};
