//! Chroma keying.
//!
//! Per frame: HSV classification into a background mask, signed morphology,
//! feathered alpha and spill suppression. Colour channels are left straight
//! (never premultiplied).

use image::{Rgba, RgbaImage};
use ndarray::Zip;

use matte_models::{HsvWindow, KeyingSettings};

use crate::raster::{dilate, dilate_signed, erode_signed, gaussian_blur_sized, rgb_to_hsv, Plane};

/// Remaining saturation of fully spill-suppressed pixels.
const SPILL_RESIDUAL_SATURATION: f32 = 0.3;

/// Keys frames with one fixed set of settings.
#[derive(Debug, Clone)]
pub struct KeyingEngine {
    window: HsvWindow,
    erode: i32,
    dilate: i32,
    feather: u32,
    spill: u32,
}

impl KeyingEngine {
    pub fn new(settings: &KeyingSettings) -> Self {
        Self {
            window: settings.mode.window(),
            erode: settings.erode,
            dilate: settings.dilate,
            feather: settings.feather,
            spill: settings.spill,
        }
    }

    /// Background mask: 1.0 where the pixel lies in the key window.
    pub fn background_mask(&self, image: &RgbaImage) -> Plane {
        let mut mask = Plane::zeros((image.height() as usize, image.width() as usize));
        for (x, y, px) in image.enumerate_pixels() {
            let (h, s, v) = rgb_to_hsv(px[0], px[1], px[2]);
            if self.window.contains(h, s, v) {
                mask[[y as usize, x as usize]] = 1.0;
            }
        }
        let mask = erode_signed(&mask, self.erode);
        dilate_signed(&mask, self.dilate)
    }

    /// Alpha in 0–255 from a background mask. Foreground pixels stay at
    /// exactly 255; the feather band only spreads outward into the background,
    /// at most `feather / 2` pixels.
    pub fn alpha_from_mask(&self, background: &Plane) -> Plane {
        let foreground = background.mapv(|b| 1.0 - b);
        let soft = gaussian_blur_sized(&foreground, self.feather as usize);
        let mut alpha = Plane::zeros(foreground.dim());
        Zip::from(&mut alpha)
            .and(&foreground)
            .and(&soft)
            .for_each(|a, &hard, &blurred| *a = hard.max(blurred) * 255.0);
        alpha
    }

    /// Weight in 0–1 of spill suppression: foreground pixels within `spill`
    /// pixels of the background.
    pub fn spill_map(&self, background: &Plane) -> Plane {
        if self.spill == 0 {
            return Plane::zeros(background.dim());
        }
        let reach = dilate(background, 2 * self.spill as usize + 1);
        let mut map = Plane::zeros(background.dim());
        Zip::from(&mut map)
            .and(&reach)
            .and(background)
            .for_each(|m, &near, &bg| *m = near * (1.0 - bg));
        map
    }

    /// Key one frame.
    pub fn key(&self, image: &RgbaImage) -> RgbaImage {
        let background = self.background_mask(image);
        let alpha = self.alpha_from_mask(&background);
        let spill = self.spill_map(&background);

        RgbaImage::from_fn(image.width(), image.height(), |x, y| {
            let idx = [y as usize, x as usize];
            let px = image.get_pixel(x, y);
            let [r, g, b] = desaturate([px[0], px[1], px[2]], spill[idx]);
            let a = alpha[idx].round().clamp(0.0, 255.0) as u8;
            Rgba([r, g, b, a])
        })
    }
}

fn desaturate(rgb: [u8; 3], weight: f32) -> [u8; 3] {
    if weight <= 0.0 {
        return rgb;
    }
    let [r, g, b] = rgb.map(|c| c as f32);
    let luma = 0.2126 * r + 0.7152 * g + 0.0722 * b;
    let keep = 1.0 - weight * (1.0 - SPILL_RESIDUAL_SATURATION);
    [r, g, b].map(|c| (luma + (c - luma) * keep).round().clamp(0.0, 255.0) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use matte_models::{BackgroundColor, HsvSample};

    const GREEN: Rgba<u8> = Rgba([0, 200, 0, 255]);
    const RED: Rgba<u8> = Rgba([200, 30, 30, 255]);

    /// 64x64 green frame with a solid red square at [24, 40).
    fn green_screen() -> RgbaImage {
        RgbaImage::from_fn(64, 64, |x, y| {
            if (24..40).contains(&x) && (24..40).contains(&y) {
                RED
            } else {
                GREEN
            }
        })
    }

    fn in_square(x: u32, y: u32) -> bool {
        (24..40).contains(&x) && (24..40).contains(&y)
    }

    /// Share of background pixels keyed to alpha <= 2 in a 320x240 green
    /// frame holding a 120x120 red square; asserts the square stays opaque.
    fn keyed_background_share(settings: &KeyingSettings) -> f64 {
        let square = |x: u32, y: u32| (100..220).contains(&x) && (60..180).contains(&y);
        let frame = RgbaImage::from_fn(320, 240, |x, y| if square(x, y) { RED } else { GREEN });
        let keyed = KeyingEngine::new(settings).key(&frame);

        let mut background = 0usize;
        let mut transparent = 0usize;
        for (x, y, px) in keyed.enumerate_pixels() {
            if square(x, y) {
                assert_eq!(px[3], 255, "foreground pixel ({x},{y}) not opaque");
            } else {
                background += 1;
                if px[3] <= 2 {
                    transparent += 1;
                }
            }
        }
        transparent as f64 / background as f64
    }

    #[test]
    fn test_flat_background_keyed_out() {
        let settings = KeyingSettings::automatic(BackgroundColor::Green);
        assert!(settings.feather > 0);
        let share = keyed_background_share(&settings);
        assert!(share > 0.99, "only {share:.4} of the background is transparent");
    }

    #[test]
    fn test_feather_band_is_narrow() {
        let settings = KeyingSettings::automatic(BackgroundColor::Green).with_feather(5);
        let frame = RgbaImage::from_fn(64, 64, |x, _| if x >= 32 { RED } else { GREEN });
        let keyed = KeyingEngine::new(&settings).key(&frame);

        assert!(keyed.get_pixel(31, 10)[3] > 0);
        assert!(keyed.get_pixel(30, 10)[3] > 0);
        assert_eq!(keyed.get_pixel(29, 10)[3], 0);
        assert!(keyed_background_share(&settings) > 0.98);
    }

    #[test]
    fn test_no_feather_gives_hard_matte() {
        let settings = KeyingSettings::automatic(BackgroundColor::Green)
            .with_morphology(0, 0)
            .with_feather(0);
        let keyed = KeyingEngine::new(&settings).key(&green_screen());

        let transparent = keyed
            .enumerate_pixels()
            .filter(|(x, y, px)| !in_square(*x, *y) && px[3] == 0)
            .count();
        let background = 64 * 64 - 16 * 16;
        assert!(transparent as f64 / background as f64 > 0.99);
        assert!(keyed
            .enumerate_pixels()
            .filter(|(x, y, _)| in_square(*x, *y))
            .all(|(_, _, px)| px[3] == 255));
    }

    #[test]
    fn test_feather_band_extends_outward_only() {
        let settings = KeyingSettings::automatic(BackgroundColor::Green)
            .with_morphology(0, 0)
            .with_feather(6);
        let keyed = KeyingEngine::new(&settings).key(&green_screen());
        assert_eq!(keyed.get_pixel(24, 24)[3], 255);
        let edge = keyed.get_pixel(22, 32)[3];
        assert!(edge > 0 && edge < 255, "expected partial alpha, got {edge}");
        assert_eq!(keyed.get_pixel(2, 2)[3], 0);
    }

    #[test]
    fn test_spill_touches_colour_not_alpha() {
        let image = RgbaImage::from_fn(16, 16, |x, _| if x < 8 { GREEN } else { Rgba([180, 150, 120, 255]) });
        let base = KeyingSettings::automatic(BackgroundColor::Green)
            .with_morphology(0, 0)
            .with_feather(0);

        let plain = KeyingEngine::new(&base.clone().with_spill(0)).key(&image);
        let suppressed = KeyingEngine::new(&base.with_spill(2)).key(&image);

        for (a, b) in plain.pixels().zip(suppressed.pixels()) {
            assert_eq!(a[3], b[3]);
        }
        // Pixel next to the edge is desaturated, far pixel untouched.
        assert_ne!(plain.get_pixel(8, 4), suppressed.get_pixel(8, 4));
        assert_eq!(plain.get_pixel(15, 4), suppressed.get_pixel(15, 4));
    }

    #[test]
    fn test_manual_mode_keys_sampled_colour() {
        let magenta = Rgba([220, 0, 220, 255]);
        let image = RgbaImage::from_fn(8, 8, |x, _| if x < 4 { magenta } else { GREEN });
        let (hue, s, v) = rgb_to_hsv(220, 0, 220);
        let settings = KeyingSettings::manual(HsvSample { hue, saturation: s, value: v }, 10.0, 30, 30)
            .with_morphology(0, 0)
            .with_feather(0)
            .with_spill(0);
        let keyed = KeyingEngine::new(&settings).key(&image);
        assert_eq!(keyed.get_pixel(0, 0)[3], 0);
        assert_eq!(keyed.get_pixel(7, 0)[3], 255);
    }
}
