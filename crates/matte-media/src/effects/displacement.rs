use matte_models::DisplacementConfig;

use crate::error::MediaResult;
use crate::raster::{sample_bilinear, FramePlanes, Plane};
use crate::texture::Texture;

use super::FrameEffect;

/// Warp driven by texture luminance: mid-grey leaves a pixel in place, white
/// and black push it `intensity` pixels in opposite directions on both axes.
pub struct Displacement {
    intensity: f32,
    texture: Texture,
}

impl Displacement {
    pub fn new(config: &DisplacementConfig, texture: Texture) -> Self {
        Self {
            intensity: config.intensity,
            texture,
        }
    }
}

impl FrameEffect for Displacement {
    fn name(&self) -> &'static str {
        "displacement"
    }

    fn apply(&self, frame: FramePlanes, frame_index: usize) -> MediaResult<FramePlanes> {
        if self.intensity == 0.0 {
            return Ok(frame);
        }
        let map = self.texture.frame(frame_index);
        let (height, width) = frame.a.dim();

        let mut out = FramePlanes::zeros(width as u32, height as u32);
        for y in 0..height {
            for x in 0..width {
                let px = map.get_pixel(x as u32, y as u32);
                let luma = (0.2126 * px[0] as f32 + 0.7152 * px[1] as f32 + 0.0722 * px[2] as f32) / 255.0;
                let offset = (luma - 0.5) * 2.0 * self.intensity;
                let sx = x as f32 + offset;
                let sy = y as f32 + offset;

                let sample = |plane: &Plane| sample_bilinear(plane, sx, sy);
                out.r[[y, x]] = sample(&frame.r);
                out.g[[y, x]] = sample(&frame.g);
                out.b[[y, x]] = sample(&frame.b);
                out.a[[y, x]] = sample(&frame.a);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use matte_models::TextureWrap;

    fn ramp() -> FramePlanes {
        let image = RgbaImage::from_fn(16, 16, |x, _| Rgba([(x * 10) as u8, 0, 0, 255]));
        FramePlanes::from_image(&image)
    }

    fn flat_texture(v: u8) -> Texture {
        Texture::from_frames(
            "displacement",
            vec![RgbaImage::from_pixel(16, 16, Rgba([v, v, v, 255]))],
            TextureWrap::Wrap,
        )
        .unwrap()
    }

    fn config(intensity: f32) -> DisplacementConfig {
        DisplacementConfig {
            enabled: true,
            intensity,
        }
    }

    #[test]
    fn test_white_texture_shifts_by_intensity() {
        let stage = Displacement::new(&config(3.0), flat_texture(255));
        let out = stage.apply(ramp(), 0).unwrap();
        // Sample at x + 3 on a ramp of 10 per pixel.
        assert!((out.r[[5, 4]] - 70.0).abs() < 1e-3);
        // Clamped at the right edge.
        assert!((out.r[[5, 15]] - 150.0).abs() < 1e-3);
    }

    #[test]
    fn test_zero_intensity_is_identity() {
        let stage = Displacement::new(&config(0.0), flat_texture(255));
        let frame = ramp();
        assert_eq!(stage.apply(frame.clone(), 0).unwrap(), frame);
    }
}
