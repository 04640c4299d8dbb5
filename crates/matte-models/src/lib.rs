//! Shared data models for the matte job pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, their status state machine and result references
//! - Keying and compositing effect configuration
//! - Alpha-preserving encoding configuration

pub mod effects;
pub mod encoding;
pub mod error;
pub mod job;
pub mod keying;
pub mod payload;
pub mod result;
pub mod status;

// Re-export common types
pub use effects::{
    AlphaBevelConfig, BlendConfig, DisplacementConfig, DropShadowConfig, EffectConfig, PosterizeConfig,
    SurfaceBevelConfig, TextureWrap,
};
pub use encoding::{AlphaCodec, EncodingConfig, DEFAULT_PALETTE_COLORS};
pub use error::{ModelError, ModelResult};
pub use job::{Job, JobId, JobType, NewJob, Priority, StatusView};
pub use keying::{BackgroundColor, HsvSample, HsvWindow, KeyingMode, KeyingSettings};
pub use payload::{KeyingPayload, OutputOptions, StitchPayload, TextureSources};
pub use result::{ResultRef, ResultVariant};
pub use status::{JobStatus, TransitionCause};
