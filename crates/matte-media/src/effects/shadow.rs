use matte_models::DropShadowConfig;

use crate::error::MediaResult;
use crate::raster::{gaussian_blur, shift, FramePlanes, Plane};

use super::FrameEffect;

/// Uniform-colour copy of the matte, blurred and offset, composited beneath
/// the frame with straight-alpha "over".
pub struct DropShadow {
    blur: f32,
    offset: (i32, i32),
    opacity: f32,
    color: [f32; 3],
}

impl DropShadow {
    pub fn new(config: &DropShadowConfig) -> Self {
        Self {
            blur: config.blur,
            offset: (config.offset_x, config.offset_y),
            opacity: config.opacity,
            color: config.color.map(f32::from),
        }
    }

    /// Shadow alpha (0–255) for a given matte.
    pub fn render_layer(&self, alpha: &Plane) -> Plane {
        let blurred = gaussian_blur(alpha, self.blur);
        let mut layer = shift(&blurred, self.offset.0, self.offset.1);
        if self.opacity != 1.0 {
            layer.mapv_inplace(|v| v * self.opacity);
        }
        layer
    }
}

impl FrameEffect for DropShadow {
    fn name(&self) -> &'static str {
        "drop_shadow"
    }

    fn apply(&self, mut frame: FramePlanes, _frame_index: usize) -> MediaResult<FramePlanes> {
        let layer = self.render_layer(&frame.a);
        let (height, width) = frame.a.dim();

        for y in 0..height {
            for x in 0..width {
                let idx = [y, x];
                let fg = frame.a[idx] / 255.0;
                let sh = layer[idx] / 255.0;
                let under = sh * (1.0 - fg);
                let out = fg + under;
                if out <= 0.0 {
                    continue;
                }
                frame.r[idx] = (frame.r[idx] * fg + self.color[0] * under) / out;
                frame.g[idx] = (frame.g[idx] * fg + self.color[1] * under) / out;
                frame.b[idx] = (frame.b[idx] * fg + self.color[2] * under) / out;
                frame.a[idx] = out * 255.0;
            }
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn square() -> FramePlanes {
        let image = RgbaImage::from_fn(20, 20, |x, y| {
            if (5..10).contains(&x) && (5..10).contains(&y) {
                Rgba([250, 20, 20, 255])
            } else {
                Rgba([0, 0, 0, 0])
            }
        });
        FramePlanes::from_image(&image)
    }

    fn shadow(blur: f32, dx: i32, dy: i32, opacity: f32) -> DropShadow {
        DropShadow::new(&DropShadowConfig {
            enabled: true,
            blur,
            offset_x: dx,
            offset_y: dy,
            opacity,
            color: [0, 0, 255],
        })
    }

    #[test]
    fn test_zero_offset_zero_blur_matches_matte() {
        let frame = square();
        let layer = shadow(0.0, 0, 0, 1.0).render_layer(&frame.a);
        assert_eq!(layer, frame.a);
    }

    #[test]
    fn test_offset_shadow_beneath_frame() {
        let frame = square();
        let out = shadow(0.0, 4, 4, 0.5).apply(frame.clone(), 0).unwrap();

        // Foreground stays on top and opaque.
        assert_eq!(out.a[[6, 6]], 255.0);
        assert_eq!(out.r[[6, 6]], 250.0);

        // Shadow-only pixel carries the shadow colour at half opacity.
        assert!((out.a[[12, 12]] - 127.5).abs() < 1e-3);
        assert!((out.b[[12, 12]] - 255.0).abs() < 1e-3);

        // Uncovered pixels stay fully transparent.
        assert_eq!(out.a[[0, 0]], 0.0);
    }

    #[test]
    fn test_blur_spreads_layer() {
        let frame = square();
        let layer = shadow(3.0, 0, 0, 1.0).render_layer(&frame.a);
        assert!(layer[[3, 7]] > 0.0);
        assert!(layer[[7, 7]] < 255.0);
    }
}
