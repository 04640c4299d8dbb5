//! Sequential per-frame processing: load, key, composite, write, drop.
//!
//! Runs on a blocking thread. Only one frame is resident at a time; the float
//! planes are reused between frames and released every `reclaim_every` frames.

use image::RgbaImage;
use std::path::Path;
use tracing::debug;

use matte_models::JobId;

use crate::effects::EffectsPipeline;
use crate::error::MediaResult;
use crate::frame::{save_frame, Frame, FrameSequence};
use crate::keying::KeyingEngine;
use crate::raster::FramePlanes;

/// Default number of frames between scratch-buffer releases.
pub const DEFAULT_RECLAIM_EVERY: usize = 32;

/// Per-job frame processor.
pub struct FrameProcessor {
    keying: KeyingEngine,
    effects: EffectsPipeline,
    reclaim_every: usize,
}

/// Counters from one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessStats {
    pub frames: usize,
    pub reclaims: usize,
}

impl FrameProcessor {
    pub fn new(keying: KeyingEngine, effects: EffectsPipeline, reclaim_every: usize) -> Self {
        Self {
            keying,
            effects,
            reclaim_every: reclaim_every.max(1),
        }
    }

    /// Key and composite one frame.
    pub fn process_frame(
        &self,
        image: &RgbaImage,
        frame_index: usize,
        scratch: &mut Option<FramePlanes>,
    ) -> MediaResult<RgbaImage> {
        let keyed = self.keying.key(image);
        if self.effects.is_empty() {
            return Ok(keyed);
        }

        let mut planes = scratch.take().unwrap_or_else(|| FramePlanes::zeros(keyed.width(), keyed.height()));
        planes.fill_from(&keyed);
        drop(keyed);

        let planes = self.effects.apply(planes, frame_index)?;
        let out = planes.to_image();
        *scratch = Some(planes);
        Ok(out)
    }

    /// Process every frame of `input` into `output_dir`.
    ///
    /// `on_frame` is called after each frame is written, with the count done.
    pub fn process_sequence<F>(
        &self,
        input: &FrameSequence,
        output_dir: &Path,
        job_id: &JobId,
        mut on_frame: F,
    ) -> MediaResult<(FrameSequence, ProcessStats)>
    where
        F: FnMut(usize),
    {
        std::fs::create_dir_all(output_dir)?;
        let mut scratch: Option<FramePlanes> = None;
        let mut stats = ProcessStats::default();

        for index in 0..input.len() {
            let source = input.load(index, job_id)?;
            let image = self.process_frame(&source.image, index, &mut scratch)?;
            drop(source);

            save_frame(output_dir, &Frame::new(index, image, job_id.clone()))?;
            stats.frames += 1;
            metrics::counter!("matte_frames_processed_total").increment(1);
            on_frame(stats.frames);

            if stats.frames % self.reclaim_every == 0 && scratch.is_some() {
                scratch = None;
                stats.reclaims += 1;
                debug!(job_id = %job_id, frames = stats.frames, "Released frame scratch buffers");
            }
        }

        let output = FrameSequence::new(output_dir, stats.frames, input.fps(), input.width(), input.height());
        Ok((output, stats))
    }
}
