//! Compositing effects chain.
//!
//! Stages run in a fixed order:
//!
//! 1. displacement warp
//! 2. multiply blend
//! 3. add (linear dodge) blend
//! 4. surface bevel
//! 5. alpha bevel
//! 6. drop shadow
//!
//! Disabled stages are not instantiated at all, so they cannot alter a frame.
//! Every stage works on `f32` planes and only the drop shadow writes alpha.

mod alpha_bevel;
mod blend;
mod displacement;
mod shadow;
mod surface_bevel;

pub use alpha_bevel::AlphaBevel;
pub use blend::{Blend, BlendMode};
pub use displacement::Displacement;
pub use shadow::DropShadow;
pub use surface_bevel::SurfaceBevel;

use std::time::Instant;
use tracing::debug;

use matte_models::EffectConfig;

use crate::error::{MediaError, MediaResult};
use crate::raster::FramePlanes;
use crate::texture::Texture;

/// One frame transform.
pub trait FrameEffect: Send + Sync {
    /// Stage name used in logs, metrics and errors.
    fn name(&self) -> &'static str;

    /// Transform a frame. `frame_index` selects the texture frame.
    fn apply(&self, frame: FramePlanes, frame_index: usize) -> MediaResult<FramePlanes>;
}

/// A configured pipeline stage.
pub enum EffectStage {
    Displacement(Displacement),
    Multiply(Blend),
    Add(Blend),
    SurfaceBevel(SurfaceBevel),
    AlphaBevel(AlphaBevel),
    DropShadow(DropShadow),
}

impl EffectStage {
    fn effect(&self) -> &dyn FrameEffect {
        match self {
            EffectStage::Displacement(e) => e as &dyn FrameEffect,
            EffectStage::Multiply(e) | EffectStage::Add(e) => e as &dyn FrameEffect,
            EffectStage::SurfaceBevel(e) => e as &dyn FrameEffect,
            EffectStage::AlphaBevel(e) => e as &dyn FrameEffect,
            EffectStage::DropShadow(e) => e as &dyn FrameEffect,
        }
    }

    pub fn name(&self) -> &'static str {
        self.effect().name()
    }
}

/// Textures handed to the stages that need them.
#[derive(Debug, Default)]
pub struct StageTextures {
    pub displacement: Option<Texture>,
    pub multiply: Option<Texture>,
    pub add: Option<Texture>,
}

/// Ordered list of enabled stages.
#[derive(Default)]
pub struct EffectsPipeline {
    stages: Vec<EffectStage>,
}

impl EffectsPipeline {
    /// Instantiate the enabled stages. A texture-driven stage without its
    /// texture is a configuration error.
    pub fn from_config(config: &EffectConfig, mut textures: StageTextures) -> MediaResult<Self> {
        let mut stages = Vec::new();

        if config.displacement.enabled {
            let texture = take_texture(&mut textures.displacement, "displacement")?;
            stages.push(EffectStage::Displacement(Displacement::new(&config.displacement, texture)));
        }
        if config.multiply.enabled {
            let texture = take_texture(&mut textures.multiply, "multiply")?;
            stages.push(EffectStage::Multiply(Blend::new(BlendMode::Multiply, &config.multiply, texture)));
        }
        if config.add.enabled {
            let texture = take_texture(&mut textures.add, "add")?;
            stages.push(EffectStage::Add(Blend::new(BlendMode::Add, &config.add, texture)));
        }
        if config.surface_bevel.enabled {
            stages.push(EffectStage::SurfaceBevel(SurfaceBevel::new(&config.surface_bevel)));
        }
        if config.alpha_bevel.enabled {
            stages.push(EffectStage::AlphaBevel(AlphaBevel::new(&config.alpha_bevel)));
        }
        if config.drop_shadow.enabled {
            stages.push(EffectStage::DropShadow(DropShadow::new(&config.drop_shadow)));
        }

        Ok(Self { stages })
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(EffectStage::name).collect()
    }

    /// Run every stage in order.
    pub fn apply(&self, mut frame: FramePlanes, frame_index: usize) -> MediaResult<FramePlanes> {
        for stage in &self.stages {
            let name = stage.name();
            let started = Instant::now();

            frame = stage.effect().apply(frame, frame_index).map_err(|e| match e {
                MediaError::Stage { .. } => e,
                other => MediaError::stage(name, other.to_string()),
            })?;

            if let Some(channel) = frame.first_non_finite() {
                return Err(MediaError::stage(
                    name,
                    format!("non-finite value in channel {channel} at frame {frame_index}"),
                ));
            }

            metrics::histogram!("matte_stage_seconds", "stage" => name).record(started.elapsed().as_secs_f64());
        }

        if frame_index == 0 && !self.stages.is_empty() {
            debug!(stages = ?self.stage_names(), "Effects applied to first frame");
        }
        Ok(frame)
    }
}

fn take_texture(slot: &mut Option<Texture>, stage: &'static str) -> MediaResult<Texture> {
    slot.take()
        .ok_or_else(|| MediaError::stage(stage, "stage enabled without a texture"))
}
