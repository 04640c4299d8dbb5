//! Floating-point raster planes and the filters the keying and effect stages
//! are built from.
//!
//! Planes are `ndarray::Array2<f32>` indexed `[y, x]`. Borders are handled by
//! clamping to the nearest edge pixel unless stated otherwise.

use image::{Rgba, RgbaImage};
use ndarray::Array2;

/// One channel of a frame.
pub type Plane = Array2<f32>;

/// A frame split into straight (non-premultiplied) channels, each in 0–255.
#[derive(Debug, Clone, PartialEq)]
pub struct FramePlanes {
    pub r: Plane,
    pub g: Plane,
    pub b: Plane,
    pub a: Plane,
}

impl FramePlanes {
    pub fn zeros(width: u32, height: u32) -> Self {
        let shape = (height as usize, width as usize);
        Self {
            r: Plane::zeros(shape),
            g: Plane::zeros(shape),
            b: Plane::zeros(shape),
            a: Plane::zeros(shape),
        }
    }

    pub fn from_image(image: &RgbaImage) -> Self {
        let mut planes = Self::zeros(image.width(), image.height());
        planes.fill_from(image);
        planes
    }

    /// Overwrite with the contents of `image`, reusing the allocation when
    /// the dimensions match.
    pub fn fill_from(&mut self, image: &RgbaImage) {
        if self.width() != image.width() || self.height() != image.height() {
            *self = Self::zeros(image.width(), image.height());
        }
        for (x, y, px) in image.enumerate_pixels() {
            let idx = [y as usize, x as usize];
            self.r[idx] = px[0] as f32;
            self.g[idx] = px[1] as f32;
            self.b[idx] = px[2] as f32;
            self.a[idx] = px[3] as f32;
        }
    }

    /// Quantize back to 8-bit. This is the only place channels are clamped.
    pub fn to_image(&self) -> RgbaImage {
        let (height, width) = self.a.dim();
        RgbaImage::from_fn(width as u32, height as u32, |x, y| {
            let idx = [y as usize, x as usize];
            Rgba([
                quantize(self.r[idx]),
                quantize(self.g[idx]),
                quantize(self.b[idx]),
                quantize(self.a[idx]),
            ])
        })
    }

    pub fn width(&self) -> u32 {
        self.a.ncols() as u32
    }

    pub fn height(&self) -> u32 {
        self.a.nrows() as u32
    }

    /// Rec. 709 luma in 0–1.
    pub fn luminance(&self) -> Plane {
        let mut luma = Plane::zeros(self.a.dim());
        ndarray::Zip::from(&mut luma)
            .and(&self.r)
            .and(&self.g)
            .and(&self.b)
            .for_each(|l, &r, &g, &b| *l = (0.2126 * r + 0.7152 * g + 0.0722 * b) / 255.0);
        luma
    }

    /// Name of the first channel holding a NaN or infinity.
    pub fn first_non_finite(&self) -> Option<&'static str> {
        [("r", &self.r), ("g", &self.g), ("b", &self.b), ("a", &self.a)]
            .into_iter()
            .find(|(_, plane)| plane.iter().any(|v| !v.is_finite()))
            .map(|(name, _)| name)
    }
}

fn quantize(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Normalized 1-D Gaussian kernel with radius `ceil(3σ)`.
pub fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (sigma * 3.0).ceil().max(1.0) as usize;
    kernel_with_radius(sigma, radius)
}

/// Normalized 1-D Gaussian kernel of odd side `size`, with the sigma OpenCV
/// derives when none is given: `0.3 * ((size - 1) / 2 - 1) + 0.8`.
pub fn gaussian_kernel_sized(size: usize) -> Vec<f32> {
    let size = size | 1;
    let radius = (size - 1) / 2;
    let sigma = 0.3 * (radius as f32 - 1.0) + 0.8;
    kernel_with_radius(sigma, radius)
}

fn kernel_with_radius(sigma: f32, radius: usize) -> Vec<f32> {
    let two_sigma_sq = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (0..=2 * radius)
        .map(|i| {
            let d = i as f32 - radius as f32;
            (-d * d / two_sigma_sq).exp()
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    kernel.iter_mut().for_each(|w| *w /= sum);
    kernel
}

/// Separable Gaussian blur. `sigma <= 0` returns an exact copy.
pub fn gaussian_blur(plane: &Plane, sigma: f32) -> Plane {
    if sigma <= 0.0 || plane.is_empty() {
        return plane.clone();
    }
    let kernel = gaussian_kernel(sigma);
    let horizontal = convolve_rows(plane, &kernel);
    convolve_cols(&horizontal, &kernel)
}

/// Separable Gaussian blur with a kernel of side `size` (even sizes round up).
/// Sizes of 1 or less return an exact copy.
pub fn gaussian_blur_sized(plane: &Plane, size: usize) -> Plane {
    if size <= 1 || plane.is_empty() {
        return plane.clone();
    }
    let kernel = gaussian_kernel_sized(size);
    let horizontal = convolve_rows(plane, &kernel);
    convolve_cols(&horizontal, &kernel)
}

fn convolve_rows(plane: &Plane, kernel: &[f32]) -> Plane {
    let (height, width) = plane.dim();
    let radius = (kernel.len() / 2) as isize;
    let last = width as isize - 1;
    let mut out = Plane::zeros((height, width));
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = (x as isize + k as isize - radius).clamp(0, last) as usize;
                acc += plane[[y, sx]] * weight;
            }
            out[[y, x]] = acc;
        }
    }
    out
}

fn convolve_cols(plane: &Plane, kernel: &[f32]) -> Plane {
    let (height, width) = plane.dim();
    let radius = (kernel.len() / 2) as isize;
    let last = height as isize - 1;
    let mut out = Plane::zeros((height, width));
    for y in 0..height {
        for (k, weight) in kernel.iter().enumerate() {
            let sy = (y as isize + k as isize - radius).clamp(0, last) as usize;
            for x in 0..width {
                out[[y, x]] += plane[[sy, x]] * weight;
            }
        }
    }
    out
}

/// Grey-scale erosion with a square kernel of side `size`.
pub fn erode(plane: &Plane, size: usize) -> Plane {
    morph(plane, size, f32::INFINITY, f32::min)
}

/// Grey-scale dilation with a square kernel of side `size`.
pub fn dilate(plane: &Plane, size: usize) -> Plane {
    morph(plane, size, f32::NEG_INFINITY, f32::max)
}

/// Signed morphology: positive erodes, negative dilates, zero is identity.
pub fn erode_signed(plane: &Plane, amount: i32) -> Plane {
    match amount {
        0 => plane.clone(),
        n if n > 0 => erode(plane, n as usize),
        n => dilate(plane, n.unsigned_abs() as usize),
    }
}

/// Signed morphology: positive dilates, negative erodes, zero is identity.
pub fn dilate_signed(plane: &Plane, amount: i32) -> Plane {
    erode_signed(plane, -amount)
}

// Separable min/max filter. Window covers [i - (size-1)/2, i + size/2];
// samples outside the plane are ignored.
fn morph(plane: &Plane, size: usize, init: f32, op: fn(f32, f32) -> f32) -> Plane {
    if size <= 1 || plane.is_empty() {
        return plane.clone();
    }
    let (height, width) = plane.dim();
    let before = (size - 1) / 2;
    let after = size / 2;

    let mut rows = Plane::zeros((height, width));
    for y in 0..height {
        for x in 0..width {
            let lo = x.saturating_sub(before);
            let hi = (x + after).min(width - 1);
            rows[[y, x]] = (lo..=hi).fold(init, |acc, sx| op(acc, plane[[y, sx]]));
        }
    }

    let mut out = Plane::zeros((height, width));
    for y in 0..height {
        let lo = y.saturating_sub(before);
        let hi = (y + after).min(height - 1);
        for x in 0..width {
            out[[y, x]] = (lo..=hi).fold(init, |acc, sy| op(acc, rows[[sy, x]]));
        }
    }
    out
}

/// Sobel gradient, normalized so a unit ramp yields a gradient of 1.
pub fn sobel(plane: &Plane) -> (Plane, Plane) {
    let (height, width) = plane.dim();
    let mut gx = Plane::zeros((height, width));
    let mut gy = Plane::zeros((height, width));
    if plane.is_empty() {
        return (gx, gy);
    }
    let at = |y: isize, x: isize| -> f32 {
        let y = y.clamp(0, height as isize - 1) as usize;
        let x = x.clamp(0, width as isize - 1) as usize;
        plane[[y, x]]
    };
    for y in 0..height as isize {
        for x in 0..width as isize {
            let dx = (at(y - 1, x + 1) + 2.0 * at(y, x + 1) + at(y + 1, x + 1))
                - (at(y - 1, x - 1) + 2.0 * at(y, x - 1) + at(y + 1, x - 1));
            let dy = (at(y + 1, x - 1) + 2.0 * at(y + 1, x) + at(y + 1, x + 1))
                - (at(y - 1, x - 1) + 2.0 * at(y - 1, x) + at(y - 1, x + 1));
            gx[[y as usize, x as usize]] = dx / 8.0;
            gy[[y as usize, x as usize]] = dy / 8.0;
        }
    }
    (gx, gy)
}

/// Bilinear sample with clamp-to-edge addressing.
pub fn sample_bilinear(plane: &Plane, x: f32, y: f32) -> f32 {
    let (height, width) = plane.dim();
    if height == 0 || width == 0 {
        return 0.0;
    }
    let x = x.clamp(0.0, (width - 1) as f32);
    let y = y.clamp(0.0, (height - 1) as f32);
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let top = plane[[y0, x0]] * (1.0 - fx) + plane[[y0, x1]] * fx;
    let bottom = plane[[y1, x0]] * (1.0 - fx) + plane[[y1, x1]] * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Translate by whole pixels; uncovered pixels become zero.
pub fn shift(plane: &Plane, dx: i32, dy: i32) -> Plane {
    let (height, width) = plane.dim();
    let mut out = Plane::zeros((height, width));
    for y in 0..height as i64 {
        let sy = y - dy as i64;
        if sy < 0 || sy >= height as i64 {
            continue;
        }
        for x in 0..width as i64 {
            let sx = x - dx as i64;
            if sx < 0 || sx >= width as i64 {
                continue;
            }
            out[[y as usize, x as usize]] = plane[[sy as usize, sx as usize]];
        }
    }
    out
}

/// Convert 8-bit RGB to HSV with hue in degrees and S, V in 0–255.
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (f32, u8, u8) {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = max - min;

    let hue = if delta == 0.0 {
        0.0
    } else if max == rf {
        60.0 * ((gf - bf) / delta).rem_euclid(6.0)
    } else if max == gf {
        60.0 * ((bf - rf) / delta + 2.0)
    } else {
        60.0 * ((rf - gf) / delta + 4.0)
    };
    let saturation = if max == 0.0 { 0.0 } else { delta / max * 255.0 };

    (hue, saturation.round() as u8, max as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_blur_zero_sigma_is_exact() {
        let plane = array![[0.0, 255.0], [12.5, 3.0]];
        assert_eq!(gaussian_blur(&plane, 0.0), plane);
    }

    #[test]
    fn test_blur_preserves_constant() {
        let plane = Plane::from_elem((9, 7), 128.0);
        let blurred = gaussian_blur(&plane, 2.0);
        assert!(blurred.iter().all(|v| (v - 128.0).abs() < 1e-3));
    }

    #[test]
    fn test_sized_kernel_matches_opencv() {
        let kernel = gaussian_kernel_sized(5);
        assert_eq!(kernel.len(), 5);
        assert!((kernel.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        // sigma 1.1 for a 5-tap kernel
        let ratio = kernel[0] / kernel[2];
        assert!((ratio - (-4.0f32 / (2.0 * 1.21)).exp()).abs() < 1e-5);
        assert_eq!(gaussian_kernel_sized(4).len(), 5);

        let plane = array![[0.0, 255.0], [12.5, 3.0]];
        assert_eq!(gaussian_blur_sized(&plane, 1), plane);
    }

    #[test]
    fn test_erode_dilate_square() {
        let mut plane = Plane::zeros((7, 7));
        plane[[3, 3]] = 1.0;
        let grown = dilate(&plane, 3);
        assert_eq!(grown.sum(), 9.0);
        assert_eq!(grown[[2, 2]], 1.0);
        assert_eq!(erode(&grown, 3).sum(), 1.0);
        assert_eq!(erode_signed(&plane, -3), grown);
        assert_eq!(dilate_signed(&plane, 0), plane);
    }

    #[test]
    fn test_sobel_unit_ramp() {
        let plane = Plane::from_shape_fn((5, 5), |(_, x)| x as f32);
        let (gx, gy) = sobel(&plane);
        assert!((gx[[2, 2]] - 1.0).abs() < 1e-6);
        assert!(gy[[2, 2]].abs() < 1e-6);
    }

    #[test]
    fn test_bilinear_midpoint_and_clamp() {
        let plane = array![[0.0, 10.0], [20.0, 30.0]];
        assert!((sample_bilinear(&plane, 0.5, 0.5) - 15.0).abs() < 1e-6);
        assert_eq!(sample_bilinear(&plane, -4.0, 9.0), 20.0);
    }

    #[test]
    fn test_shift_fills_zero() {
        let plane = array![[1.0, 2.0], [3.0, 4.0]];
        let shifted = shift(&plane, 1, 0);
        assert_eq!(shifted, array![[0.0, 1.0], [0.0, 3.0]]);
        assert_eq!(shift(&plane, 0, 0), plane);
    }

    #[test]
    fn test_hsv_primaries() {
        assert_eq!(rgb_to_hsv(0, 255, 0), (120.0, 255, 255));
        assert_eq!(rgb_to_hsv(0, 0, 255), (240.0, 255, 255));
        let (h, s, v) = rgb_to_hsv(255, 0, 0);
        assert_eq!((h, s, v), (0.0, 255, 255));
        assert_eq!(rgb_to_hsv(40, 40, 40).1, 0);
    }

    #[test]
    fn test_planes_round_trip_and_finite_check() {
        let image = RgbaImage::from_pixel(3, 2, Rgba([10, 20, 30, 40]));
        let mut planes = FramePlanes::from_image(&image);
        assert_eq!(planes.to_image(), image);
        assert_eq!(planes.first_non_finite(), None);
        planes.b[[1, 1]] = f32::NAN;
        assert_eq!(planes.first_non_finite(), Some("b"));
    }
}
