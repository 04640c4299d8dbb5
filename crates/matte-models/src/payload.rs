//! Typed payloads of keying and stitching jobs.
//!
//! Payloads travel as JSON inside [`crate::Job::payload`]. Keying and
//! stitching payloads are parsed and validated here before a job row exists;
//! payloads of other job types are opaque to this crate.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::effects::EffectConfig;
use crate::encoding::AlphaCodec;
use crate::error::{ModelError, ModelResult};
use crate::keying::KeyingSettings;

/// Animated textures used by the effect stages. Each entry is a path to a
/// video or a single image.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TextureSources {
    pub displacement: Option<String>,
    pub multiply: Option<String>,
    pub add: Option<String>,
}

/// Extra variants to build alongside the transparent video.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct OutputOptions {
    pub codec: AlphaCodec,
    /// ZIP of the processed PNG frames
    pub still_archive: bool,
    /// Reduced-palette looping GIF
    pub palette_animation: bool,
}

/// Everything a worker needs to run one keying job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct KeyingPayload {
    /// Source video path
    #[validate(length(min = 1))]
    pub source: String,

    #[serde(default)]
    #[validate(nested)]
    pub keying: KeyingSettings,

    #[serde(default)]
    #[validate(nested)]
    pub effects: EffectConfig,

    #[serde(default)]
    pub textures: TextureSources,

    #[serde(default)]
    pub outputs: OutputOptions,
}

impl KeyingPayload {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            keying: KeyingSettings::default(),
            effects: EffectConfig::default(),
            textures: TextureSources::default(),
            outputs: OutputOptions::default(),
        }
    }

    pub fn with_keying(mut self, keying: KeyingSettings) -> Self {
        self.keying = keying;
        self
    }

    pub fn with_effects(mut self, effects: EffectConfig) -> Self {
        self.effects = effects;
        self
    }

    pub fn with_textures(mut self, textures: TextureSources) -> Self {
        self.textures = textures;
        self
    }

    pub fn with_outputs(mut self, outputs: OutputOptions) -> Self {
        self.outputs = outputs;
        self
    }

    /// Parse and fully validate a JSON payload.
    pub fn from_value(value: &serde_json::Value) -> ModelResult<Self> {
        let payload: KeyingPayload = serde_json::from_value(value.clone())
            .map_err(|e| ModelError::validation(format!("malformed keying payload: {e}")))?;
        payload.check()?;
        Ok(payload)
    }

    /// Range checks plus cross-field rules: a texture-driven stage must have
    /// its texture.
    pub fn check(&self) -> ModelResult<()> {
        self.validate()?;

        let required = [
            ("displacement", self.effects.displacement.enabled, &self.textures.displacement),
            ("multiply", self.effects.multiply.enabled, &self.textures.multiply),
            ("add", self.effects.add.enabled, &self.textures.add),
        ];
        for (stage, enabled, texture) in required {
            if enabled && texture.as_deref().map_or(true, str::is_empty) {
                return Err(ModelError::validation(format!(
                    "{stage} stage is enabled but no {stage} texture was given"
                )));
            }
        }
        Ok(())
    }

    pub fn to_value(&self) -> ModelResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Clips to join end to end, in order. Each entry is a local path or a URL
/// ffmpeg can open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct StitchPayload {
    #[validate(length(min = 2), custom(function = "validate_clip_sources"))]
    pub sources: Vec<String>,
}

fn validate_clip_sources(sources: &[String]) -> Result<(), ValidationError> {
    if sources.iter().any(|s| s.trim().is_empty()) {
        return Err(ValidationError::new("empty_source"));
    }
    Ok(())
}

impl StitchPayload {
    pub fn new<I, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sources: sources.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_value(value: &serde_json::Value) -> ModelResult<Self> {
        let payload: StitchPayload = serde_json::from_value(value.clone())
            .map_err(|e| ModelError::validation(format!("malformed stitching payload: {e}")))?;
        payload.validate()?;
        Ok(payload)
    }

    pub fn to_value(&self) -> ModelResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}
