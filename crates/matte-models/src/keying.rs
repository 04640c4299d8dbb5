//! Chroma-key settings.
//!
//! Hue is expressed in degrees (0–360), saturation and value on the 0–255
//! byte scale. The automatic presets match the defaults the keying UI has
//! always shipped with (OpenCV half-degree hue 60 ± 25, S/V ≥ 50).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Background colour declared for automatic keying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundColor {
    #[default]
    Green,
    Blue,
}

/// A single sampled HSV point (manual mode).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HsvSample {
    /// Hue in degrees, [0, 360)
    pub hue: f32,
    pub saturation: u8,
    pub value: u8,
}

/// How the threshold window is derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KeyingMode {
    /// Preset thresholds keyed to a declared background colour.
    Automatic {
        #[serde(default)]
        background: BackgroundColor,
    },
    /// Thresholds derived from one sampled point plus slider ranges.
    Manual {
        sample: HsvSample,
        /// Degrees either side of the sampled hue
        hue_tolerance: f32,
        /// Accepted distance either side of the sampled saturation
        saturation_range: u8,
        /// Accepted distance either side of the sampled value
        value_range: u8,
    },
}

impl Default for KeyingMode {
    fn default() -> Self {
        KeyingMode::Automatic {
            background: BackgroundColor::Green,
        }
    }
}

/// Inclusive HSV classification window. The hue range may wrap past 360°.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HsvWindow {
    pub hue_center: f32,
    pub hue_tolerance: f32,
    pub saturation_min: u8,
    pub saturation_max: u8,
    pub value_min: u8,
    pub value_max: u8,
}

impl HsvWindow {
    /// Whether a pixel (hue in degrees) falls inside the window.
    pub fn contains(&self, hue: f32, saturation: u8, value: u8) -> bool {
        if saturation < self.saturation_min || saturation > self.saturation_max {
            return false;
        }
        if value < self.value_min || value > self.value_max {
            return false;
        }
        let diff = (hue - self.hue_center).rem_euclid(360.0);
        let distance = diff.min(360.0 - diff);
        distance <= self.hue_tolerance
    }
}

impl BackgroundColor {
    /// Preset window for this background.
    pub fn preset(&self) -> HsvWindow {
        match self {
            BackgroundColor::Green => HsvWindow {
                hue_center: 120.0,
                hue_tolerance: 50.0,
                saturation_min: 50,
                saturation_max: 255,
                value_min: 50,
                value_max: 255,
            },
            BackgroundColor::Blue => HsvWindow {
                hue_center: 225.0,
                hue_tolerance: 35.0,
                saturation_min: 60,
                saturation_max: 255,
                value_min: 40,
                value_max: 255,
            },
        }
    }
}

impl KeyingMode {
    /// Resolve the classification window.
    pub fn window(&self) -> HsvWindow {
        match self {
            KeyingMode::Automatic { background } => background.preset(),
            KeyingMode::Manual {
                sample,
                hue_tolerance,
                saturation_range,
                value_range,
            } => HsvWindow {
                hue_center: sample.hue.rem_euclid(360.0),
                hue_tolerance: *hue_tolerance,
                saturation_min: sample.saturation.saturating_sub(*saturation_range),
                saturation_max: sample.saturation.saturating_add(*saturation_range),
                value_min: sample.value.saturating_sub(*value_range),
                value_max: sample.value.saturating_add(*value_range),
            },
        }
    }
}

fn validate_mode(mode: &KeyingMode) -> Result<(), ValidationError> {
    if let KeyingMode::Manual {
        sample,
        hue_tolerance,
        ..
    } = mode
    {
        if !(0.0..360.0).contains(&sample.hue) {
            return Err(ValidationError::new("hue_out_of_range"));
        }
        if !(0.0..=180.0).contains(hue_tolerance) {
            return Err(ValidationError::new("hue_tolerance_out_of_range"));
        }
    }
    Ok(())
}

/// Full keying configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default)]
pub struct KeyingSettings {
    #[validate(custom(function = "validate_mode"))]
    pub mode: KeyingMode,
    /// Erosion of the background mask in pixels; negative dilates instead
    #[validate(range(min = -25, max = 25))]
    pub erode: i32,
    /// Dilation of the background mask in pixels; negative erodes instead
    #[validate(range(min = -25, max = 25))]
    pub dilate: i32,
    /// Side of the Gaussian kernel that softens the mask edge, as in OpenCV's
    /// `GaussianBlur`; even sizes round up to the next odd one. The band
    /// reaches `feather / 2` pixels past the foreground.
    #[validate(range(max = 25))]
    pub feather: u32,
    /// Spill-suppression strength (dilation passes of the spill map)
    #[validate(range(max = 10))]
    pub spill: u32,
}

impl Default for KeyingSettings {
    fn default() -> Self {
        Self {
            mode: KeyingMode::default(),
            erode: 0,
            dilate: 0,
            feather: 3,
            spill: 2,
        }
    }
}

impl KeyingSettings {
    /// Automatic keying against the given background with default morphology.
    pub fn automatic(background: BackgroundColor) -> Self {
        Self {
            mode: KeyingMode::Automatic { background },
            ..Default::default()
        }
    }

    /// Manual keying around a sampled point.
    pub fn manual(sample: HsvSample, hue_tolerance: f32, saturation_range: u8, value_range: u8) -> Self {
        Self {
            mode: KeyingMode::Manual {
                sample,
                hue_tolerance,
                saturation_range,
                value_range,
            },
            ..Default::default()
        }
    }

    pub fn with_morphology(mut self, erode: i32, dilate: i32) -> Self {
        self.erode = erode;
        self.dilate = dilate;
        self
    }

    pub fn with_feather(mut self, feather: u32) -> Self {
        self.feather = feather;
        self
    }

    pub fn with_spill(mut self, spill: u32) -> Self {
        self.spill = spill;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = KeyingSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.erode, 0);
        assert_eq!(settings.feather, 3);
    }

    #[test]
    fn test_green_preset_contains_pure_green() {
        let window = BackgroundColor::Green.preset();
        assert!(window.contains(120.0, 255, 255));
        assert!(!window.contains(0.0, 255, 255));
        assert!(!window.contains(120.0, 10, 255));
    }

    #[test]
    fn test_manual_window_wraps_hue() {
        let settings = KeyingSettings::manual(
            HsvSample {
                hue: 355.0,
                saturation: 200,
                value: 200,
            },
            20.0,
            60,
            60,
        );
        let window = settings.mode.window();
        assert!(window.contains(10.0, 200, 200));
        assert!(window.contains(340.0, 150, 250));
        assert!(!window.contains(30.0, 200, 200));
        assert_eq!(window.saturation_max, 255);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let settings = KeyingSettings::default().with_morphology(40, 0);
        assert!(settings.validate().is_err());

        let settings = KeyingSettings::manual(
            HsvSample {
                hue: 400.0,
                saturation: 0,
                value: 0,
            },
            10.0,
            0,
            0,
        );
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let settings: KeyingSettings =
            serde_json::from_str(r#"{"mode": {"kind": "automatic", "background": "blue"}, "erode": -3}"#)
                .unwrap();
        assert_eq!(settings.mode, KeyingMode::Automatic { background: BackgroundColor::Blue });
        assert_eq!(settings.erode, -3);
        assert_eq!(settings.dilate, 1);
    }
}
