//! Alpha-preserving video encoding configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default CRF for VP9 alpha output (near-lossless; edges band badly above ~20)
pub const DEFAULT_CRF: u8 = 10;
/// Default ProRes 4444 profile index
pub const PRORES_4444_PROFILE: &str = "4";
/// Colours kept when building the palette animation
pub const DEFAULT_PALETTE_COLORS: u16 = 128;

/// Alpha-capable output codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlphaCodec {
    /// VP9 in WebM with `yuva420p`
    #[default]
    Vp9Webm,
    /// ProRes 4444 in QuickTime with `yuva444p10le`
    ProRes4444,
}

impl AlphaCodec {
    pub fn encoder(&self) -> &'static str {
        match self {
            AlphaCodec::Vp9Webm => "libvpx-vp9",
            AlphaCodec::ProRes4444 => "prores_ks",
        }
    }

    pub fn pixel_format(&self) -> &'static str {
        match self {
            AlphaCodec::Vp9Webm => "yuva420p",
            AlphaCodec::ProRes4444 => "yuva444p10le",
        }
    }

    /// File extension of the container, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            AlphaCodec::Vp9Webm => "webm",
            AlphaCodec::ProRes4444 => "mov",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            AlphaCodec::Vp9Webm => "video/webm",
            AlphaCodec::ProRes4444 => "video/quicktime",
        }
    }
}

/// Encoding configuration for the final transparent video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EncodingConfig {
    pub codec: AlphaCodec,

    /// Constant Rate Factor (VP9 only; 0-63, lower is better)
    pub crf: u8,

    /// Encoder threads. One thread plus the bitexact flags keeps the output
    /// byte-identical between runs.
    pub threads: u32,

    /// Additional FFmpeg output arguments
    pub extra_args: Vec<String>,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            codec: AlphaCodec::default(),
            crf: DEFAULT_CRF,
            threads: 1,
            extra_args: Vec::new(),
        }
    }
}

impl EncodingConfig {
    pub fn new(codec: AlphaCodec) -> Self {
        Self {
            codec,
            ..Default::default()
        }
    }

    /// Returns a new config with updated CRF.
    pub fn with_crf(mut self, crf: u8) -> Self {
        self.crf = crf;
        self
    }

    /// Convert to FFmpeg output arguments.
    ///
    /// Pixel format and colour metadata are always explicit so that players
    /// never guess a matrix and shift the edge colours.
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-c:v".into(),
            self.codec.encoder().into(),
            "-pix_fmt".into(),
            self.codec.pixel_format().into(),
        ];

        match self.codec {
            AlphaCodec::Vp9Webm => {
                args.extend([
                    "-crf".into(),
                    self.crf.to_string(),
                    "-b:v".into(),
                    "0".into(),
                    "-row-mt".into(),
                    "0".into(),
                    "-metadata:s:v:0".into(),
                    "alpha_mode=1".into(),
                ]);
            }
            AlphaCodec::ProRes4444 => {
                args.extend([
                    "-profile:v".into(),
                    PRORES_4444_PROFILE.into(),
                    "-vendor".into(),
                    "apl0".into(),
                    "-alpha_bits".into(),
                    "16".into(),
                ]);
            }
        }

        args.extend([
            "-colorspace".into(),
            "bt709".into(),
            "-color_primaries".into(),
            "bt709".into(),
            "-color_trc".into(),
            "bt709".into(),
            "-color_range".into(),
            "tv".into(),
            "-threads".into(),
            self.threads.to_string(),
            "-fflags".into(),
            "+bitexact".into(),
            "-flags:v".into(),
            "+bitexact".into(),
            "-an".into(),
        ]);

        args.extend(self.extra_args.iter().cloned());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EncodingConfig::default();
        assert_eq!(config.codec, AlphaCodec::Vp9Webm);
        assert_eq!(config.crf, 10);
        assert_eq!(config.threads, 1);
    }

    #[test]
    fn test_vp9_args_declare_alpha() {
        let args = EncodingConfig::default().to_ffmpeg_args();
        assert!(args.contains(&"libvpx-vp9".to_string()));
        assert!(args.contains(&"yuva420p".to_string()));
        assert!(args.contains(&"alpha_mode=1".to_string()));
        assert!(args.contains(&"bt709".to_string()));
        let threads = args.iter().position(|a| a == "-threads").unwrap();
        assert_eq!(args[threads + 1], "1");
    }

    #[test]
    fn test_prores_args() {
        let args = EncodingConfig::new(AlphaCodec::ProRes4444).to_ffmpeg_args();
        assert!(args.contains(&"prores_ks".to_string()));
        assert!(args.contains(&"yuva444p10le".to_string()));
        assert!(!args.contains(&"-crf".to_string()));
        assert_eq!(AlphaCodec::ProRes4444.extension(), "mov");
    }
}
