//! The immutable description of one generation job.
//!
//! A [`GenerationRequest`] is built by the caller, validated with
//! [`GenerationRequest::validate`], and then handed to the controller,
//! which only ever reads it.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::sampling::{MaskFill, SamplingMethod};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default number of sampling steps.
pub const DEFAULT_STEPS: u32 = 30;
/// Default classifier-free guidance scale.
pub const DEFAULT_CFG_SCALE: f64 = 7.5;
/// Default output edge length in pixels.
pub const DEFAULT_DIMENSION: u32 = 512;
/// Default strength with which a source image is re-noised.
pub const DEFAULT_DENOISING_STRENGTH: f64 = 0.66;
/// Default mask edge blur in pixels.
pub const DEFAULT_MASK_BLUR_PX: u32 = 4;

/// Upper bound on sampling steps.
pub const MAX_STEPS: u32 = 150;
/// Upper bound on the guidance scale.
pub const MAX_CFG_SCALE: f64 = 30.0;
/// Largest accepted output width or height.
pub const MAX_DIMENSION: u32 = 2048;
/// Output dimensions must be a multiple of this (latent downsampling factor).
pub const DIMENSION_STEP: u32 = 8;
/// Seeds are drawn from `0..=MAX_SEED`.
pub const MAX_SEED: u64 = u32::MAX as u64;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Parameters for one text-to-image or image-to-image generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    pub seed: u64,
    pub steps: u32,
    pub sampling_method: SamplingMethod,
    pub cfg_scale: f64,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub restore_faces: bool,
    #[serde(default)]
    pub tiling: bool,
    /// Starting image for image-to-image generation.
    #[serde(default)]
    pub source_image: Option<SourceImage>,
    /// Restricts generation to part of the source image.
    #[serde(default)]
    pub mask: Option<Mask>,
}

/// An encoded image used as the starting point of the generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceImage {
    pub mime: String,
    /// Encoded image bytes, base64 on the wire.
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    /// `0.0` keeps the source untouched, `1.0` ignores it entirely.
    pub denoising_strength: f64,
}

/// Inpainting mask applied on top of the source image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mask {
    /// Encoded single-channel mask image, base64 on the wire.
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub blur_px: u32,
    pub fill: MaskFill,
    /// Generate outside the mask instead of inside it.
    #[serde(default)]
    pub invert: bool,
}

/// Standard base64 (with padding) for image payloads embedded in JSON.
mod base64_bytes {
    use base64::{engine::general_purpose, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&general_purpose::STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Construction and validation
// ---------------------------------------------------------------------------

impl GenerationRequest {
    /// A text-to-image request with default sampling settings.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: String::new(),
            seed: 0,
            steps: DEFAULT_STEPS,
            sampling_method: SamplingMethod::default(),
            cfg_scale: DEFAULT_CFG_SCALE,
            width: DEFAULT_DIMENSION,
            height: DEFAULT_DIMENSION,
            restore_faces: false,
            tiling: false,
            source_image: None,
            mask: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_sampling_method(mut self, method: SamplingMethod) -> Self {
        self.sampling_method = method;
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_source_image(mut self, source: SourceImage) -> Self {
        self.source_image = Some(source);
        self
    }

    pub fn with_mask(mut self, mask: Mask) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Whether the server is expected to report incremental progress for
    /// this request.
    pub fn supports_previews(&self) -> bool {
        self.sampling_method.supports_previews()
    }

    /// Check the request against the server's accepted parameter ranges.
    ///
    /// Rules:
    /// - The prompt must not be blank.
    /// - `steps` must be in `1..=MAX_STEPS`.
    /// - `cfg_scale` must be in `0.0..=MAX_CFG_SCALE`.
    /// - Width and height must be positive multiples of `DIMENSION_STEP`,
    ///   no larger than `MAX_DIMENSION`.
    /// - A source image's `denoising_strength` must be in `0.0..=1.0`.
    /// - A mask requires a source image.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.prompt.trim().is_empty() {
            return Err(CoreError::Validation("Prompt must not be empty".to_string()));
        }

        if self.steps == 0 || self.steps > MAX_STEPS {
            return Err(CoreError::Validation(format!(
                "steps must be between 1 and {MAX_STEPS}, got {}",
                self.steps
            )));
        }

        if !(0.0..=MAX_CFG_SCALE).contains(&self.cfg_scale) {
            return Err(CoreError::Validation(format!(
                "cfg_scale must be between 0 and {MAX_CFG_SCALE}, got {}",
                self.cfg_scale
            )));
        }

        validate_dimension("width", self.width)?;
        validate_dimension("height", self.height)?;

        if let Some(source) = &self.source_image {
            if !(0.0..=1.0).contains(&source.denoising_strength) {
                return Err(CoreError::Validation(format!(
                    "denoising_strength must be between 0 and 1, got {}",
                    source.denoising_strength
                )));
            }
        }

        if self.mask.is_some() && self.source_image.is_none() {
            return Err(CoreError::Validation(
                "A mask requires a source image".to_string(),
            ));
        }

        Ok(())
    }
}

fn validate_dimension(name: &str, value: u32) -> Result<(), CoreError> {
    if value == 0 || value > MAX_DIMENSION || value % DIMENSION_STEP != 0 {
        return Err(CoreError::Validation(format!(
            "{name} must be a positive multiple of {DIMENSION_STEP} \
             up to {MAX_DIMENSION}, got {value}"
        )));
    }
    Ok(())
}

/// Draw a random seed in `0..=MAX_SEED`.
pub fn random_seed() -> u64 {
    rand::rng().random_range(0..=MAX_SEED)
}

impl SourceImage {
    pub fn new(mime: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            data,
            denoising_strength: DEFAULT_DENOISING_STRENGTH,
        }
    }
}

impl Mask {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            blur_px: DEFAULT_MASK_BLUR_PX,
            fill: MaskFill::default(),
            invert: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
