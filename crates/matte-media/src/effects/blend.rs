use ndarray::Zip;

use matte_models::BlendConfig;

use crate::error::MediaResult;
use crate::raster::{FramePlanes, Plane};
use crate::texture::Texture;

use super::FrameEffect;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    /// `rgb · lerp(1, tex, w)`
    Multiply,
    /// `min(255, rgb + tex · w)`
    Add,
}

/// Texture blend weighted by `opacity · α/255`, so fully transparent pixels
/// receive nothing.
pub struct Blend {
    mode: BlendMode,
    opacity: f32,
    texture: Texture,
}

impl Blend {
    pub fn new(mode: BlendMode, config: &BlendConfig, texture: Texture) -> Self {
        Self {
            mode,
            opacity: config.opacity,
            texture,
        }
    }

    fn blend_channel(&self, channel: &mut Plane, alpha: &Plane, tex: &Plane) {
        let opacity = self.opacity;
        match self.mode {
            BlendMode::Multiply => Zip::from(channel).and(alpha).and(tex).for_each(|c, &a, &t| {
                let w = opacity * a / 255.0;
                *c *= 1.0 + (t / 255.0 - 1.0) * w;
            }),
            BlendMode::Add => Zip::from(channel).and(alpha).and(tex).for_each(|c, &a, &t| {
                let w = opacity * a / 255.0;
                *c = (*c + t * w).min(255.0);
            }),
        }
    }
}

impl FrameEffect for Blend {
    fn name(&self) -> &'static str {
        match self.mode {
            BlendMode::Multiply => "multiply",
            BlendMode::Add => "add",
        }
    }

    fn apply(&self, mut frame: FramePlanes, frame_index: usize) -> MediaResult<FramePlanes> {
        let tex = FramePlanes::from_image(self.texture.frame(frame_index));
        self.blend_channel(&mut frame.r, &frame.a, &tex.r);
        self.blend_channel(&mut frame.g, &frame.a, &tex.g);
        self.blend_channel(&mut frame.b, &frame.a, &tex.b);
        Ok(frame)
    }
}
