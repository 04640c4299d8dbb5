use matte_models::SurfaceBevelConfig;

use crate::error::MediaResult;
use crate::raster::{sobel, FramePlanes, Plane};

use super::FrameEffect;

/// Emboss of the colour surface. Luminance slopes facing the light are
/// overlaid towards white, slopes facing away towards black.
pub struct SurfaceBevel {
    depth: f32,
    light: (f32, f32),
    highlight: f32,
    shadow: f32,
}

impl SurfaceBevel {
    pub fn new(config: &SurfaceBevelConfig) -> Self {
        Self {
            depth: config.depth,
            light: light_vector(config.angle),
            highlight: config.highlight_intensity,
            shadow: config.shadow_intensity,
        }
    }

    /// Overlay layer in 0–1; 0.5 is neutral.
    fn overlay_layer(&self, frame: &FramePlanes) -> Plane {
        let (gx, gy) = sobel(&frame.luminance());
        let (lx, ly) = self.light;
        let mut layer = Plane::from_elem(gx.dim(), 0.5);
        ndarray::Zip::from(&mut layer)
            .and(&gx)
            .and(&gy)
            .for_each(|o, &dx, &dy| {
                let shade = -(dx * lx + dy * ly) * self.depth;
                let scaled = if shade >= 0.0 {
                    shade * self.highlight
                } else {
                    shade * self.shadow
                };
                *o = (0.5 + scaled * 0.5).clamp(0.0, 1.0);
            });
        layer
    }
}

/// Unit vector towards the light in image coordinates (y grows downwards).
pub(crate) fn light_vector(angle_degrees: f32) -> (f32, f32) {
    let theta = angle_degrees.to_radians();
    (theta.cos(), -theta.sin())
}

fn overlay(base: f32, layer: f32) -> f32 {
    if base < 0.5 {
        2.0 * base * layer
    } else {
        1.0 - 2.0 * (1.0 - base) * (1.0 - layer)
    }
}

impl FrameEffect for SurfaceBevel {
    fn name(&self) -> &'static str {
        "surface_bevel"
    }

    fn apply(&self, mut frame: FramePlanes, _frame_index: usize) -> MediaResult<FramePlanes> {
        let layer = self.overlay_layer(&frame);
        for channel in [&mut frame.r, &mut frame.g, &mut frame.b] {
            ndarray::Zip::from(channel)
                .and(&layer)
                .for_each(|c, &o| *c = overlay(*c / 255.0, o) * 255.0);
        }
        Ok(frame)
    }
}
