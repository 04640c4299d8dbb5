//! Compositing effect configuration.
//!
//! Every stage has its own sub-struct carrying `enabled` plus parameters.
//! Missing fields take the documented defaults; ranges are enforced by
//! [`EffectConfig::validate`] at submission time.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// How a texture shorter than the video is indexed past its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TextureWrap {
    /// `frame % len`
    #[default]
    Wrap,
    /// Hold the last texture frame
    Clamp,
}

impl TextureWrap {
    /// Texture frame to use for a video frame ordinal. `len` must be non-zero.
    pub fn index(&self, frame_index: usize, len: usize) -> usize {
        match self {
            TextureWrap::Wrap => frame_index % len,
            TextureWrap::Clamp => frame_index.min(len - 1),
        }
    }
}

/// Displacement warp driven by an animated luminance texture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default)]
pub struct DisplacementConfig {
    pub enabled: bool,
    /// Maximum offset in pixels
    #[validate(range(min = 0.0, max = 50.0))]
    pub intensity: f32,
}

impl Default for DisplacementConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            intensity: 10.0,
        }
    }
}

/// Multiply or add blend against an animated texture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default)]
pub struct BlendConfig {
    pub enabled: bool,
    #[validate(range(min = 0.0, max = 1.0))]
    pub opacity: f32,
}

impl Default for BlendConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            opacity: 0.5,
        }
    }
}

/// Emboss of the colour surface from its luminance gradient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default)]
pub struct SurfaceBevelConfig {
    pub enabled: bool,
    #[validate(range(min = 1.0, max = 10.0))]
    pub depth: f32,
    /// Light direction in degrees
    #[validate(range(min = 0.0, max = 360.0))]
    pub angle: f32,
    #[validate(range(min = 0.0, max = 1.0))]
    pub highlight_intensity: f32,
    #[validate(range(min = 0.0, max = 1.0))]
    pub shadow_intensity: f32,
}

impl Default for SurfaceBevelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            depth: 3.0,
            angle: 135.0,
            highlight_intensity: 0.6,
            shadow_intensity: 0.6,
        }
    }
}

/// Bevel of the matte edge, using the blurred alpha as a height field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default)]
pub struct AlphaBevelConfig {
    pub enabled: bool,
    /// Bevel band thickness in pixels
    #[validate(range(min = 5.0, max = 30.0))]
    pub depth: f32,
    /// Blur applied to the shade map
    #[validate(range(min = 0.0, max = 10.0))]
    pub blur: f32,
    #[validate(range(min = 0.0, max = 360.0))]
    pub angle: f32,
    #[validate(range(min = 0.0, max = 1.0))]
    pub intensity: f32,
}

impl Default for AlphaBevelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            depth: 10.0,
            blur: 2.0,
            angle: 135.0,
            intensity: 0.7,
        }
    }
}

/// Offset, blurred shadow of the matte composited beneath the frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default)]
pub struct DropShadowConfig {
    pub enabled: bool,
    #[validate(range(min = 0.0, max = 50.0))]
    pub blur: f32,
    #[validate(range(min = -200, max = 200))]
    pub offset_x: i32,
    #[validate(range(min = -200, max = 200))]
    pub offset_y: i32,
    #[validate(range(min = 0.0, max = 1.0))]
    pub opacity: f32,
    /// Shadow colour as RGB
    pub color: [u8; 3],
}

impl Default for DropShadowConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            blur: 8.0,
            offset_x: 8,
            offset_y: 8,
            opacity: 0.6,
            color: [0, 0, 0],
        }
    }
}

fn validate_target_fps(fps: u32) -> Result<(), ValidationError> {
    if matches!(fps, 8 | 12) {
        Ok(())
    } else {
        Err(ValidationError::new("target_fps_must_be_8_or_12"))
    }
}

/// Frame-rate reduction ("posterize time").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default)]
pub struct PosterizeConfig {
    pub enabled: bool,
    #[validate(custom(function = "validate_target_fps"))]
    pub target_fps: u32,
}

impl Default for PosterizeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target_fps: 12,
        }
    }
}

/// Full effect configuration, immutable once a job is submitted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(default)]
pub struct EffectConfig {
    #[validate(nested)]
    pub displacement: DisplacementConfig,
    #[validate(nested)]
    pub multiply: BlendConfig,
    #[validate(nested)]
    pub add: BlendConfig,
    #[validate(nested)]
    pub surface_bevel: SurfaceBevelConfig,
    #[validate(nested)]
    pub alpha_bevel: AlphaBevelConfig,
    #[validate(nested)]
    pub drop_shadow: DropShadowConfig,
    #[validate(nested)]
    pub posterize: PosterizeConfig,
    pub texture_wrap: TextureWrap,
}

impl EffectConfig {
    /// Whether any per-frame compositing stage is on (posterize excluded).
    pub fn any_stage_enabled(&self) -> bool {
        self.displacement.enabled
            || self.multiply.enabled
            || self.add.enabled
            || self.surface_bevel.enabled
            || self.alpha_bevel.enabled
            || self.drop_shadow.enabled
    }

    /// Names of the enabled per-frame stages, in pipeline order.
    pub fn enabled_stages(&self) -> Vec<&'static str> {
        [
            ("displacement", self.displacement.enabled),
            ("multiply", self.multiply.enabled),
            ("add", self.add.enabled),
            ("surface_bevel", self.surface_bevel.enabled),
            ("alpha_bevel", self.alpha_bevel.enabled),
            ("drop_shadow", self.drop_shadow.enabled),
        ]
        .into_iter()
        .filter_map(|(name, on)| on.then_some(name))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_disabled_and_valid() {
        let config = EffectConfig::default();
        assert!(!config.any_stage_enabled());
        assert!(config.enabled_stages().is_empty());
        assert!(config.validate().is_ok());
        assert_eq!(config.texture_wrap, TextureWrap::Wrap);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: EffectConfig = serde_json::from_str(
            r#"{"drop_shadow": {"enabled": true, "offset_x": -12}, "texture_wrap": "clamp"}"#,
        )
        .unwrap();
        assert!(config.drop_shadow.enabled);
        assert_eq!(config.drop_shadow.offset_x, -12);
        assert_eq!(config.drop_shadow.offset_y, 8);
        assert_eq!(config.texture_wrap, TextureWrap::Clamp);
        assert_eq!(config.enabled_stages(), vec!["drop_shadow"]);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mut config = EffectConfig::default();
        config.alpha_bevel.depth = 2.0;
        assert!(config.validate().is_err());

        let mut config = EffectConfig::default();
        config.drop_shadow.offset_y = 500;
        assert!(config.validate().is_err());

        let mut config = EffectConfig::default();
        config.posterize.target_fps = 15;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_posterize_targets() {
        for fps in [8, 12] {
            let config = PosterizeConfig { enabled: true, target_fps: fps };
            assert!(config.validate().is_ok(), "{fps} fps rejected");
        }
        assert!(PosterizeConfig { enabled: true, target_fps: 0 }.validate().is_err());
    }

    #[test]
    fn test_texture_wrap_index() {
        assert_eq!(TextureWrap::Wrap.index(10, 4), 2);
        assert_eq!(TextureWrap::Clamp.index(10, 4), 3);
        assert_eq!(TextureWrap::Clamp.index(1, 4), 1);
    }
}
