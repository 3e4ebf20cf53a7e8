//! Sampler and mask-fill choices offered to the generation server.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// SamplingMethod
// ---------------------------------------------------------------------------

/// Diffusion sampler used to denoise the latent image.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMethod {
    #[default]
    EulerA,
    Euler,
    Lms,
    Heun,
    Dpm2,
    Dpm2A,
    DpmPlusPlus2sA,
    DpmPlusPlus2m,
    DpmFast,
    DpmAdaptive,
    LmsKarras,
    Dpm2Karras,
    Dpm2AKarras,
    DpmPlusPlus2sAKarras,
    DpmPlusPlus2mKarras,
    Ddim,
    Plms,
}

impl SamplingMethod {
    /// Sampler name as the generation server expects it on the wire.
    pub fn api_value(&self) -> &'static str {
        match self {
            Self::EulerA => "Euler a",
            Self::Euler => "Euler",
            Self::Lms => "LMS",
            Self::Heun => "Heun",
            Self::Dpm2 => "DPM2",
            Self::Dpm2A => "DPM2 a",
            Self::DpmPlusPlus2sA => "DPM++ 2S a",
            Self::DpmPlusPlus2m => "DPM++ 2M",
            Self::DpmFast => "DPM fast",
            Self::DpmAdaptive => "DPM adaptive",
            Self::LmsKarras => "LMS Karras",
            Self::Dpm2Karras => "DPM2 Karras",
            Self::Dpm2AKarras => "DPM2 a Karras",
            Self::DpmPlusPlus2sAKarras => "DPM++ 2S a Karras",
            Self::DpmPlusPlus2mKarras => "DPM++ 2M Karras",
            Self::Ddim => "DDIM",
            Self::Plms => "PLMS",
        }
    }

    /// Whether the server can report meaningful intermediate progress.
    ///
    /// The adaptive sampler picks its step count on the fly, so there is
    /// no fixed schedule to measure progress against.
    pub fn supports_previews(&self) -> bool {
        !matches!(self, Self::DpmAdaptive)
    }

    pub fn list() -> [SamplingMethod; 17] {
        [
            Self::EulerA,
            Self::Euler,
            Self::Lms,
            Self::Heun,
            Self::Dpm2,
            Self::Dpm2A,
            Self::DpmPlusPlus2sA,
            Self::DpmPlusPlus2m,
            Self::DpmFast,
            Self::DpmAdaptive,
            Self::LmsKarras,
            Self::Dpm2Karras,
            Self::Dpm2AKarras,
            Self::DpmPlusPlus2sAKarras,
            Self::DpmPlusPlus2mKarras,
            Self::Ddim,
            Self::Plms,
        ]
    }
}

impl std::fmt::Display for SamplingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::EulerA => "Euler A (Recommended)",
            Self::Euler => "Euler",
            Self::Lms => "LMS",
            Self::Heun => "Heun",
            Self::Dpm2 => "DPM2",
            Self::Dpm2A => "DPM2 A",
            Self::DpmPlusPlus2sA => "DPM++ 2S A",
            Self::DpmPlusPlus2m => "DPM++ 2M",
            Self::DpmFast => "DPM Fast",
            Self::DpmAdaptive => "DPM Adaptive",
            Self::LmsKarras => "LMS Karras",
            Self::Dpm2Karras => "DPM2 Karras",
            Self::Dpm2AKarras => "DPM2 A Karras",
            Self::DpmPlusPlus2sAKarras => "DPM++ 2S A Karras",
            Self::DpmPlusPlus2mKarras => "DPM++ 2M Karras",
            Self::Ddim => "DDIM",
            Self::Plms => "PLMS",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// MaskFill
// ---------------------------------------------------------------------------

/// What the masked region is seeded with before inpainting starts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskFill {
    #[default]
    Fill,
    Original,
    LatentNoise,
    LatentNothing,
}

impl MaskFill {
    pub fn list() -> [MaskFill; 4] {
        [
            Self::Fill,
            Self::Original,
            Self::LatentNoise,
            Self::LatentNothing,
        ]
    }
}

impl std::fmt::Display for MaskFill {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fill => write!(f, "Smeared Surroundings"),
            Self::Original => write!(f, "Original Base Image"),
            Self::LatentNoise => write!(f, "Randomness (Latent Noise)"),
            Self::LatentNothing => write!(f, "Neutral (Latent Nothing)"),
        }
    }
}
