//! Named result references attached to a finished job.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which output a reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResultVariant {
    /// Alpha-preserving encoded video
    TransparentVideo,
    /// ZIP of the raw PNG frames
    StillArchive,
    /// Reduced-palette looping GIF
    PaletteAnimation,
    /// Clips joined end to end
    StitchedVideo,
}

impl ResultVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultVariant::TransparentVideo => "transparent_video",
            ResultVariant::StillArchive => "still_archive",
            ResultVariant::PaletteAnimation => "palette_animation",
            ResultVariant::StitchedVideo => "stitched_video",
        }
    }
}

impl fmt::Display for ResultVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Location of one stored output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ResultRef {
    pub variant: ResultVariant,
    /// Storage location (local path or object URL)
    pub location: String,
}

impl ResultRef {
    pub fn new(variant: ResultVariant, location: impl Into<String>) -> Self {
        Self {
            variant,
            location: location.into(),
        }
    }
}
