use ndarray::Zip;

use matte_models::AlphaBevelConfig;

use crate::error::MediaResult;
use crate::raster::{gaussian_blur, sobel, FramePlanes, Plane};

use super::surface_bevel::light_vector;
use super::FrameEffect;

/// Bevel of the matte edge. The alpha channel, blurred over `depth` pixels,
/// is treated as a height field and lit from `angle`. Shading is applied to
/// colour inside the mask only; alpha is read, never written.
pub struct AlphaBevel {
    depth: f32,
    blur: f32,
    light: (f32, f32),
    intensity: f32,
}

impl AlphaBevel {
    pub fn new(config: &AlphaBevelConfig) -> Self {
        Self {
            depth: config.depth,
            blur: config.blur,
            light: light_vector(config.angle),
            intensity: config.intensity,
        }
    }

    /// Signed shade in roughly −1..1: positive faces the light.
    pub fn shade_map(&self, alpha: &Plane) -> Plane {
        let height = gaussian_blur(&alpha.mapv(|a| a / 255.0), self.depth / 3.0);
        let (gx, gy) = sobel(&height);
        let (lx, ly) = self.light;

        let mut shade = Plane::zeros(height.dim());
        Zip::from(&mut shade)
            .and(&gx)
            .and(&gy)
            .for_each(|s, &dx, &dy| *s = (-(dx * lx + dy * ly) * self.depth).clamp(-1.0, 1.0));

        gaussian_blur(&shade, self.blur)
    }
}

impl FrameEffect for AlphaBevel {
    fn name(&self) -> &'static str {
        "alpha_bevel"
    }

    fn apply(&self, mut frame: FramePlanes, _frame_index: usize) -> MediaResult<FramePlanes> {
        let shade = self.shade_map(&frame.a);
        let intensity = self.intensity;

        for channel in [&mut frame.r, &mut frame.g, &mut frame.b] {
            Zip::from(channel)
                .and(&frame.a)
                .and(&shade)
                .for_each(|c, &a, &s| {
                    let w = s * intensity * (a / 255.0);
                    if w >= 0.0 {
                        *c += (255.0 - *c) * w;
                    } else {
                        *c *= 1.0 + w;
                    }
                });
        }
        Ok(frame)
    }
}
